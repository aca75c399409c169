//! The host chain substrate consumed by the EVM module: branchable stores, gas meters, events and the execution
//! context which ties them together.

pub mod context;
pub mod events;
pub mod meter;
pub mod store;

pub use context::{BlockHeader, CacheContext, Context, GasKvStore};
pub use events::{Event, EventAttribute, EventManager};
pub use meter::{
    BasicGasMeter, Gas, GasConfig, GasMeter, GasOverflow, InfiniteGasMeter, OutOfGas,
    catch_out_of_gas,
};
pub use store::{MultiStore, SnapshotId, Store};
