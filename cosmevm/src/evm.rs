//! A call-frame driver for EVM messages which reach precompiles or plain accounts. Bytecode interpretation is left to
//! the embedding chain; this driver provides the frame semantics precompiles depend on: snapshots, value transfer,
//! static-call propagation, gas accounting and revert.

use alloy::primitives::{Address, B256, Bytes, Log, U256};
use revm::interpreter::{Gas, InstructionResult};
use tracing::{debug, warn};

use crate::{
    constants::CALL_DEPTH_LIMIT,
    error::{EvmError, PrecompileError, revert_reason_bytes},
    precompiles::PrecompileSet,
    statedb::{EvmConfig, StateDb},
    tracer::{NoopTracer, Tracer},
};

/// The state interface the EVM executes against.
pub trait VmStateDb {
    fn exist(&mut self, addr: Address) -> bool;
    fn empty(&mut self, addr: Address) -> bool;

    fn get_balance(&mut self, addr: Address) -> U256;
    fn add_balance(&mut self, addr: Address, amount: U256) -> Result<(), EvmError>;
    fn sub_balance(&mut self, addr: Address, amount: U256) -> Result<(), EvmError>;

    fn get_nonce(&mut self, addr: Address) -> u64;
    fn set_nonce(&mut self, addr: Address, nonce: u64);

    fn get_code_hash(&mut self, addr: Address) -> B256;
    fn get_code(&mut self, addr: Address) -> Bytes;
    fn set_code(&mut self, addr: Address, code: Bytes);

    /// The value of a slot at the start of the transaction.
    fn get_committed_state(&mut self, addr: Address, key: B256) -> B256;
    fn get_state(&mut self, addr: Address, key: B256) -> B256;
    fn set_state(&mut self, addr: Address, key: B256, value: B256);
    fn get_transient_state(&self, addr: Address, key: B256) -> B256;
    fn set_transient_state(&mut self, addr: Address, key: B256, value: B256);

    fn get_refund(&self) -> u64;
    fn add_refund(&mut self, gas: u64);
    fn sub_refund(&mut self, gas: u64) -> Result<(), EvmError>;

    fn add_log(&mut self, log: Log);

    fn snapshot(&mut self) -> usize;
    fn revert_to_snapshot(&mut self, id: usize) -> Result<(), EvmError>;

    /// The chain's own state implementation, which precompiles require to reach the host stores.
    fn as_chain_state(&mut self) -> Option<&mut StateDb> {
        None
    }
}

/// The frame a precompile is executing in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    pub caller: Address,
    pub address: Address,
    pub value: U256,
    pub input: Bytes,
    pub gas: Gas,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub result: InstructionResult,
    pub output: Bytes,
    pub gas_left: u64,
}

impl CallOutcome {
    fn halt(result: InstructionResult, gas_left: u64) -> CallOutcome {
        CallOutcome {
            result,
            output: Bytes::new(),
            gas_left,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn is_revert(&self) -> bool {
        self.result.is_revert()
    }
}

pub struct Evm<'a> {
    state_db: &'a mut dyn VmStateDb,
    config: EvmConfig,
    precompiles: &'a PrecompileSet,
    tracer: Box<dyn Tracer + 'a>,
    depth: usize,
}

impl<'a> Evm<'a> {
    pub fn new(
        state_db: &'a mut dyn VmStateDb,
        config: EvmConfig,
        precompiles: &'a PrecompileSet,
    ) -> Evm<'a> {
        Evm {
            state_db,
            config,
            precompiles,
            tracer: Box::new(NoopTracer),
            depth: 0,
        }
    }

    pub fn with_tracer(self, tracer: Box<dyn Tracer + 'a>) -> Evm<'a> {
        Evm { tracer, ..self }
    }

    pub fn config(&self) -> &EvmConfig {
        &self.config
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn state_db(&mut self) -> &mut dyn VmStateDb {
        &mut *self.state_db
    }

    pub fn tracer(&mut self) -> &mut dyn Tracer {
        &mut *self.tracer
    }

    pub fn state_db_and_tracer(&mut self) -> (&mut dyn VmStateDb, &mut dyn Tracer) {
        (&mut *self.state_db, &mut *self.tracer)
    }

    pub fn precompiles(&self) -> &'a PrecompileSet {
        self.precompiles
    }

    /// Executes a message call from `caller` to `to`.
    pub fn call(
        &mut self,
        caller: Address,
        to: Address,
        input: Bytes,
        gas: u64,
        value: U256,
    ) -> CallOutcome {
        self.run_frame(caller, to, input, gas, value, false)
    }

    /// Executes a message call which may not modify state.
    pub fn static_call(&mut self, caller: Address, to: Address, input: Bytes, gas: u64) -> CallOutcome {
        self.run_frame(caller, to, input, gas, U256::ZERO, true)
    }

    fn run_frame(
        &mut self,
        caller: Address,
        to: Address,
        input: Bytes,
        gas: u64,
        value: U256,
        is_static: bool,
    ) -> CallOutcome {
        if self.depth >= CALL_DEPTH_LIMIT {
            return CallOutcome::halt(InstructionResult::CallTooDeep, gas);
        }
        if !value.is_zero() && self.state_db.get_balance(caller) < value {
            return CallOutcome::halt(InstructionResult::OutOfFunds, gas);
        }

        self.tracer
            .on_enter(self.depth, caller, to, &input, gas, value);
        let snapshot = self.state_db.snapshot();
        self.depth += 1;
        let mut outcome = self.execute_frame(caller, to, input, gas, value, is_static);
        self.depth -= 1;

        if !outcome.is_ok() {
            if let Err(e) = self.state_db.revert_to_snapshot(snapshot) {
                warn!(%e, "failed to revert call frame");
                outcome.result = InstructionResult::FatalExternalError;
            }
        }
        self.tracer.on_exit(
            self.depth,
            &outcome.output,
            gas.saturating_sub(outcome.gas_left),
            outcome.result,
        );
        outcome
    }

    fn execute_frame(
        &mut self,
        caller: Address,
        to: Address,
        input: Bytes,
        gas: u64,
        value: U256,
        is_static: bool,
    ) -> CallOutcome {
        let precompiles = self.precompiles;
        let precompile = precompiles.get(&to);
        if precompile.is_some() && !self.config.params.is_active_precompile(&to) {
            debug!(%to, "call to inactive precompile");
            return CallOutcome {
                result: InstructionResult::Revert,
                output: revert_reason_bytes(EvmError::InactivePrecompile(to)),
                gas_left: gas,
            };
        }

        if !value.is_zero() {
            if is_static {
                return CallOutcome::halt(InstructionResult::CallNotAllowedInsideStatic, gas);
            }
            let transfer = self
                .state_db
                .sub_balance(caller, value)
                .and_then(|()| self.state_db.add_balance(to, value));
            if let Err(e) = transfer {
                debug!(%caller, %to, %value, %e, "value transfer failed");
                return CallOutcome::halt(InstructionResult::OutOfFunds, gas);
            }
        } else if !self.state_db.exist(to) {
            // Touch the account.
            if let Err(e) = self.state_db.add_balance(to, U256::ZERO) {
                warn!(%to, %e, "failed to touch account");
                return CallOutcome::halt(InstructionResult::FatalExternalError, gas);
            }
        }

        let Some(precompile) = precompile else {
            return CallOutcome::halt(InstructionResult::Stop, gas);
        };

        let required = precompile.required_gas(&input);
        let mut contract = Contract {
            caller,
            address: to,
            value,
            input,
            gas: Gas::new(gas),
        };
        if !contract.gas.record_cost(required) {
            return CallOutcome::halt(InstructionResult::PrecompileOOG, 0);
        }

        match precompile.run(self, &mut contract, is_static) {
            Ok(output) => CallOutcome {
                result: InstructionResult::Return,
                output,
                gas_left: contract.gas.remaining(),
            },
            Err(e) => {
                debug!(address = %to, %e, "precompile failed");
                let gas_left = match e {
                    PrecompileError::OutOfGas => 0,
                    _ => contract.gas.remaining(),
                };
                CallOutcome {
                    result: e.instruction_result(),
                    output: e.output(),
                    gas_left,
                }
            }
        }
    }
}
