//! The entry protocol shared by every stateful precompile.

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes, U256},
};
use revm::interpreter::InstructionResult;
use tracing::{debug, trace};

use super::{abi::Method, abi::PrecompileAbi, balance_handler::BalanceHandler, gas};
use crate::{
    error::{EvmError, PrecompileError},
    evm::{CallOutcome, Contract, Evm},
    host::{Context, Gas, GasConfig, catch_out_of_gas},
};

/// The parts of a precompile which every implementation shares.
#[derive(Debug, Clone)]
pub struct PrecompileCore {
    pub address: Address,
    pub abi: PrecompileAbi,
    /// Prices [Precompile::required_gas]: the read half for queries, the write half for transactions.
    pub kv_gas_config: GasConfig,
}

/// Where a precompile frame got to. A frame ends either `Settled` or `Reverted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Entered,
    Dispatched,
    Executed,
    Settled,
    Reverted,
}

pub trait Precompile: Send + Sync {
    fn core(&self) -> &PrecompileCore;

    fn address(&self) -> Address {
        self.core().address
    }

    fn is_transaction(&self, method: &Method) -> bool {
        method.is_transaction()
    }

    /// Gas charged by the EVM before the frame is entered. Inputs without a known selector cost nothing here.
    fn required_gas(&self, input: &[u8]) -> Gas {
        let core = self.core();
        let Some(selector) = input.get(..4) else {
            return 0;
        };
        match core.abi.method_by_selector(selector) {
            Ok(method) => gas::required_gas(&core.kv_gas_config, input, self.is_transaction(method)),
            Err(_) => 0,
        }
    }

    /// Whether native balance movements made by `method` are replayed onto the EVM state after it returns.
    fn uses_balance_handler(&self, method: &Method) -> bool {
        self.is_transaction(method)
    }

    /// The accounts whose balances a call may move: the caller, the precompile and every address argument.
    fn balance_accounts(&self, contract: &Contract, args: &[DynSolValue]) -> Vec<Address> {
        let mut accounts = vec![contract.caller, contract.address];
        accounts.extend(args.iter().filter_map(DynSolValue::as_address));
        accounts
    }

    /// Runs the body of `method`. `ctx` is branched for this frame and metered against the frame's gas. Calls out of the
    /// body go through [cross_call].
    fn execute(
        &self,
        ctx: &Context,
        evm: &mut Evm<'_>,
        contract: &Contract,
        method: &Method,
        args: &[DynSolValue],
    ) -> Result<Bytes, PrecompileError>;

    fn run(
        &self,
        evm: &mut Evm<'_>,
        contract: &mut Contract,
        read_only: bool,
    ) -> Result<Bytes, PrecompileError> {
        run_precompile(self, evm, contract, read_only)
    }
}

/// Enters a precompile frame, dispatches the call, runs the body under a gas meter bounded by `contract.gas` and
/// settles the result.
///
/// Gas used by the body is deducted from `contract.gas` whether or not it succeeds. Running out of gas spends all of
/// it. Host state and events written by a failed body are left for the enclosing EVM frame to revert through the
/// journal.
pub fn run_precompile<P: Precompile + ?Sized>(
    precompile: &P,
    evm: &mut Evm<'_>,
    contract: &mut Contract,
    read_only: bool,
) -> Result<Bytes, PrecompileError> {
    let mut state = FrameState::Entered;
    let result = run_frame(precompile, evm, contract, read_only, &mut state);
    if let Err(e) = &result {
        debug!(address = %contract.address, ?state, %e, "precompile frame reverted");
        state = FrameState::Reverted;
    }
    trace!(address = %contract.address, ?state, gas_left = contract.gas.remaining(), "precompile frame finished");
    result
}

fn run_frame<P: Precompile + ?Sized>(
    precompile: &P,
    evm: &mut Evm<'_>,
    contract: &mut Contract,
    read_only: bool,
    state: &mut FrameState,
) -> Result<Bytes, PrecompileError> {
    let core = precompile.core();
    let (ctx, keeper) = {
        let state_db = evm
            .state_db()
            .as_chain_state()
            .ok_or(PrecompileError::NotRunInEvm)?;
        let ctx = state_db.enter_precompile(core.address)?;
        (ctx, state_db.keeper().clone())
    };

    let method = core.abi.resolve(&contract.input, contract.value)?;
    *state = FrameState::Dispatched;
    if read_only && precompile.is_transaction(method) {
        return Err(PrecompileError::WriteProtection);
    }
    if !contract.value.is_zero() && !method.is_payable() {
        return Err(PrecompileError::revert(format!("{} is not payable", method.name)));
    }
    let args = core.abi.unpack_inputs(method, &contract.input)?;

    let initial_used = ctx.gas_meter().gas_consumed();
    let Ok(body_ctx) = catch_out_of_gas(|| gas::install(&ctx, contract.gas.remaining(), initial_used)) else {
        contract.gas.spend_all();
        return Err(PrecompileError::OutOfGas);
    };

    let handler = precompile.uses_balance_handler(method).then(|| {
        let accounts = precompile.balance_accounts(contract, &args);
        BalanceHandler::before(&body_ctx, keeper, evm.state_db(), accounts)
    });

    let result = catch_out_of_gas(|| precompile.execute(&body_ctx, evm, contract, method, &args));
    let output = match result {
        Ok(output) => output,
        Err(oog) => {
            debug!(address = %core.address, descriptor = %oog.descriptor, "precompile ran out of gas");
            contract.gas.spend_all();
            return Err(PrecompileError::OutOfGas);
        }
    };
    let used = body_ctx
        .gas_meter()
        .gas_consumed()
        .saturating_sub(initial_used);
    if !contract.gas.record_cost(used) {
        contract.gas.spend_all();
        return Err(PrecompileError::OutOfGas);
    }
    let output = output?;
    *state = FrameState::Executed;

    if let Some(handler) = handler {
        let (state_db, tracer) = evm.state_db_and_tracer();
        handler.settle(&body_ctx, state_db, tracer)?;
    }
    *state = FrameState::Settled;
    Ok(output)
}

/// Makes a call out of a precompile body. The callee may spend whatever gas the body has left, and what it spends is
/// charged to the body's meter. A callee which failed fatally fails the body too.
pub fn cross_call(
    ctx: &Context,
    evm: &mut Evm<'_>,
    caller: Address,
    to: Address,
    input: Bytes,
    value: U256,
) -> Result<CallOutcome, PrecompileError> {
    let available = ctx.gas_meter().gas_remaining();
    let outcome = evm.call(caller, to, input, available, value);
    ctx.gas_meter().consume_gas(
        available.saturating_sub(outcome.gas_left),
        "cross-contract call",
    );
    if outcome.result == InstructionResult::FatalExternalError {
        return Err(EvmError::InvalidState(format!("cross-contract call to {to} failed fatally")).into());
    }
    Ok(outcome)
}
