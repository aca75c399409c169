//! Delivery of EVM transactions: the ante pipeline, then the message itself.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, Log};
use revm::interpreter::InstructionResult;
use tracing::{debug, info};

use crate::{
    ante::{AnteHandler, AnteOutcome},
    constants::intrinsic_gas,
    error::{EvmError, revert_reason},
    evm::VmStateDb,
    host::{Context, Event},
    keeper::{AccountKeeper, EvmKeeper, FeeMarketKeeper},
    precompiles::PrecompileSet,
    statedb::{EvmConfig, StateDb, TxConfig},
    tracer::Tracer,
    transaction::CosmosTx,
};

/// Maximum share of the gas used which may be refunded (EIP-3529).
const MAX_REFUND_QUOTIENT: u64 = 5;

pub const EVENT_TYPE_ETHEREUM_TX: &str = "ethereum_tx";

/// The result of applying one EVM message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionApplyResult {
    pub success: bool,
    pub return_value: Bytes,
    pub gas_used: u64,
    pub logs: Vec<Log>,
    /// The reason the message failed, if it did. The revert reason is appended when the output carries one.
    pub vm_error: Option<String>,
}

fn vm_error(result: InstructionResult, output: &[u8]) -> String {
    let message = match result {
        InstructionResult::Revert => "execution reverted",
        InstructionResult::OutOfGas | InstructionResult::PrecompileOOG => "out of gas",
        InstructionResult::CallNotAllowedInsideStatic | InstructionResult::StateChangeDuringStaticCall => {
            "write protection"
        }
        InstructionResult::OutOfFunds => "insufficient balance for transfer",
        InstructionResult::CallTooDeep => "max call depth exceeded",
        other => return format!("{other:?}"),
    };
    match revert_reason(output) {
        Some(reason) => format!("{message}: {reason}"),
        None => message.to_owned(),
    }
}

/// Owns everything a transaction needs for its lifetime, so that nothing in the pipeline refers back to the executor.
pub struct Executor {
    evm_keeper: Arc<dyn EvmKeeper>,
    ante: AnteHandler,
    precompiles: PrecompileSet,
}

impl Executor {
    pub fn new(
        evm_keeper: Arc<dyn EvmKeeper>,
        accounts: Arc<dyn AccountKeeper>,
        fee_market: Arc<dyn FeeMarketKeeper>,
        precompiles: PrecompileSet,
    ) -> Executor {
        Executor {
            ante: AnteHandler::new(evm_keeper.clone(), accounts, fee_market),
            evm_keeper,
            precompiles,
        }
    }

    pub fn precompiles(&self) -> &PrecompileSet {
        &self.precompiles
    }

    /// Runs `tx` through the ante pipeline and applies its EVM message to `ctx`.
    ///
    /// An `Err` from the ante pipeline leaves `ctx` untouched. An `Err` after the pipeline has passed leaves the
    /// pipeline's effects (nonce and fee) in place but none of the message's. A message which fails inside the EVM is
    /// not an `Err`; its result has `success == false`.
    pub fn deliver_tx(
        &self,
        ctx: &Context,
        tx: &CosmosTx,
        tracer: Option<Box<dyn Tracer + '_>>,
    ) -> Result<TransactionApplyResult, EvmError> {
        let outcome = self.ante.handle(ctx, tx)?;
        self.apply_message(outcome, tracer)
    }

    fn apply_message(
        &self,
        outcome: AnteOutcome,
        tracer: Option<Box<dyn Tracer + '_>>,
    ) -> Result<TransactionApplyResult, EvmError> {
        let AnteOutcome {
            ctx,
            tx,
            effective_gas_price,
            ..
        } = outcome;
        let keeper = &self.evm_keeper;
        let config = EvmConfig::from_context(&ctx, keeper.as_ref());

        let Some(to) = tx.tx.to() else {
            if !config.params.enable_create {
                return Err(EvmError::CreateDisabled);
            }
            return Err(EvmError::NotSupported(
                "contract creation requires a bytecode interpreter".to_owned(),
            ));
        };
        if !config.params.enable_call {
            return Err(EvmError::CallDisabled);
        }

        let gas_limit = tx.tx.gas_limit();
        let intrinsic = intrinsic_gas(tx.tx.input(), false)
            .ok_or_else(|| EvmError::GasOverflow("intrinsic gas".to_owned()))?;
        if gas_limit < intrinsic {
            return Err(EvmError::InvalidGasLimit(format!(
                "intrinsic gas too low: have {gas_limit}, want {intrinsic}"
            )));
        }

        let tx_index = keeper.get_tx_index_transient(&ctx);
        let log_index = keeper.get_log_size_transient(&ctx);
        let tx_config = TxConfig::new(ctx.header().hash, tx.hash, tx_index, log_index);
        let mut state_db = StateDb::new(ctx.clone(), keeper.clone(), tx_config);

        let call = {
            let mut evm = keeper.new_evm(&ctx, config, tracer, &mut state_db, &self.precompiles);
            evm.call(
                tx.signer,
                to,
                tx.tx.input().clone(),
                gas_limit - intrinsic,
                tx.tx.value(),
            )
        };

        if call.result == InstructionResult::FatalExternalError {
            return Err(EvmError::InvalidState(
                revert_reason(&call.output).unwrap_or_else(|| "fatal error in call frame".to_owned()),
            ));
        }

        let mut gas_used = gas_limit - call.gas_left;
        let refund = state_db.get_refund().min(gas_used / MAX_REFUND_QUOTIENT);
        gas_used -= refund;
        // Logs of a failed call were dropped with its frame.
        let logs = state_db.logs().to_vec();
        state_db.commit()?;

        keeper.refund_gas(&ctx, tx.signer, gas_limit - gas_used, effective_gas_price)?;
        let total_gas_used = keeper.get_transient_gas_used(&ctx).saturating_add(gas_used);
        keeper.set_transient_gas_used(&ctx, total_gas_used);
        keeper.set_tx_index_transient(&ctx, tx_index + 1);
        keeper.set_log_size_transient(&ctx, log_index + logs.len() as u64);

        let result = TransactionApplyResult {
            success: call.is_ok(),
            vm_error: (!call.is_ok()).then(|| vm_error(call.result, &call.output)),
            return_value: call.output,
            gas_used,
            logs,
        };
        emit_ethereum_tx_event(&ctx, &tx.hash.to_string(), to, tx_index, &result);
        info!(
            hash = %tx.hash,
            sender = %tx.signer,
            gas_used,
            success = result.success,
            "delivered EVM transaction"
        );
        if let Some(e) = &result.vm_error {
            debug!(hash = %tx.hash, vm_error = %e, "EVM message failed");
        }
        Ok(result)
    }
}

fn emit_ethereum_tx_event(
    ctx: &Context,
    hash: &str,
    recipient: Address,
    tx_index: u64,
    result: &TransactionApplyResult,
) {
    let mut event = Event::new(EVENT_TYPE_ETHEREUM_TX)
        .with_attribute("ethereum_tx_hash", hash)
        .with_attribute("recipient", recipient)
        .with_attribute("tx_index", tx_index)
        .with_attribute("tx_gas_used", result.gas_used);
    if let Some(e) = &result.vm_error {
        event = event.with_attribute("ethereum_tx_failed", e);
    }
    ctx.event_manager().emit_event(event);
}
