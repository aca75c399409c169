//! Gas accounting for precompile frames.

use std::sync::Arc;

use crate::host::{BasicGasMeter, Context, Gas, GasConfig};

/// Returns a context whose gas meter is bounded by `budget` and has already consumed `initial_used`. KV access is free
/// in the returned context, since the EVM prices a precompile call up front through [required_gas].
///
/// Consuming past the budget panics with [OutOfGas](crate::host::OutOfGas), as does an `initial_used` larger than the
/// budget.
pub fn install(ctx: &Context, budget: Gas, initial_used: Gas) -> Context {
    let meter = Arc::new(BasicGasMeter::new(budget));
    let ctx = ctx
        .with_gas_meter(meter)
        .with_kv_gas_config(GasConfig::zero())
        .with_transient_kv_gas_config(GasConfig::zero());
    ctx.gas_meter()
        .consume_gas(initial_used, "creating a new gas meter");
    ctx
}

/// The gas charged before a precompile runs: a flat cost plus a cost per byte of arguments. Transactions pay the write
/// schedule and queries the read schedule.
pub fn required_gas(config: &GasConfig, input: &[u8], is_transaction: bool) -> Gas {
    let args_len = input.len().saturating_sub(4) as Gas;
    if is_transaction {
        config
            .write_flat
            .saturating_add(config.write_per_byte.saturating_mul(args_len))
    } else {
        config
            .read_flat
            .saturating_add(config.read_per_byte.saturating_mul(args_len))
    }
}
