pub mod ante;
pub mod cfg;
pub mod constants;
pub mod error;
pub mod evm;
pub mod exec;
pub mod host;
pub mod keeper;
pub mod precompiles;
pub mod rpc;
pub mod statedb;
pub mod tracer;
pub mod transaction;
pub mod units;
