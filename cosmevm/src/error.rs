use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

use alloy::{
    hex,
    primitives::{Address, Bytes},
    sol_types::{Revert, SolError, decode_revert_reason},
};
use jsonrpsee::types::ErrorObjectOwned;
use revm::interpreter::InstructionResult;

/// Codespace of errors registered by the EVM module.
pub const EVM_CODESPACE: &str = "evm";
/// Codespace of errors shared with the host chain.
pub const SDK_CODESPACE: &str = "sdk";

/// JSON-RPC error code for a reverted execution.
pub const EXECUTION_ERROR_CODE: i32 = 3;
/// JSON-RPC error code for any other server-side failure.
pub const SERVER_ERROR_CODE: i32 = -32000;

/// A module error with a stable `(codespace, code)` pair, as surfaced in transaction results.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EvmError {
    #[error("invalid storage state: {0}")]
    InvalidState(String),
    #[error("invalid chain configuration: {0}")]
    InvalidChainConfig(String),
    #[error("invalid zero address")]
    ZeroAddress,
    #[error("EVM Create operation is disabled")]
    CreateDisabled,
    #[error("EVM Call operation is disabled")]
    CallDisabled,
    #[error("invalid transaction amount: {0}")]
    InvalidAmount(String),
    #[error("invalid gas price: {0}")]
    InvalidGasPrice(String),
    #[error("invalid gas fee: {0}")]
    InvalidGasFee(String),
    #[error("evm transaction execution failed: {0}")]
    VmExecution(String),
    #[error("invalid gas refund: {0}")]
    InvalidRefund(String),
    #[error("invalid gas cap: {0}")]
    InvalidGasCap(String),
    #[error("invalid base fee: {0}")]
    InvalidBaseFee(String),
    #[error("gas computation overflow/underflow: {0}")]
    GasOverflow(String),
    #[error("invalid account: {0}")]
    InvalidAccount(String),
    #[error("invalid gas limit: {0}")]
    InvalidGasLimit(String),
    #[error("precompile not enabled: {0}")]
    InactivePrecompile(Address),
    #[error("abi pack failed: {0}")]
    AbiPack(String),
    #[error("abi unpack failed: {0}")]
    AbiUnpack(String),

    #[error("account sequence mismatch, expected {expected}, got {got}")]
    InvalidSequence { expected: u64, got: u64 },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("tx intended signer does not match the given signer: {0}")]
    InvalidSigner(String),
    #[error("out of gas: {0}")]
    OutOfGas(String),
    #[error("invalid height: {0}")]
    InvalidHeight(String),
    #[error("invalid chain-id: {0}")]
    InvalidChainId(String),
    #[error("unknown extension options: {0}")]
    UnknownExtensionOptions(String),
    #[error("feature not supported: {0}")]
    NotSupported(String),
}

impl EvmError {
    pub fn codespace(&self) -> &'static str {
        match self {
            EvmError::InvalidSequence { .. }
            | EvmError::Unauthorized(_)
            | EvmError::InsufficientFunds(_)
            | EvmError::InvalidRequest(_)
            | EvmError::InvalidSigner(_)
            | EvmError::OutOfGas(_)
            | EvmError::InvalidHeight(_)
            | EvmError::InvalidChainId(_)
            | EvmError::UnknownExtensionOptions(_)
            | EvmError::NotSupported(_) => SDK_CODESPACE,
            _ => EVM_CODESPACE,
        }
    }

    /// The registered ABCI code of this error within its codespace.
    pub fn code(&self) -> u32 {
        match self {
            EvmError::InvalidState(_) => 2,
            EvmError::InvalidChainConfig(_) => 3,
            EvmError::ZeroAddress => 4,
            EvmError::CreateDisabled => 5,
            EvmError::CallDisabled => 6,
            EvmError::InvalidAmount(_) => 7,
            EvmError::InvalidGasPrice(_) => 8,
            EvmError::InvalidGasFee(_) => 9,
            EvmError::VmExecution(_) => 10,
            EvmError::InvalidRefund(_) => 11,
            EvmError::InvalidGasCap(_) => 12,
            EvmError::InvalidBaseFee(_) => 13,
            EvmError::GasOverflow(_) => 14,
            EvmError::InvalidAccount(_) => 15,
            EvmError::InvalidGasLimit(_) => 16,
            EvmError::InactivePrecompile(_) => 17,
            EvmError::AbiPack(_) => 18,
            EvmError::AbiUnpack(_) => 19,

            EvmError::InvalidSequence { .. } => 3,
            EvmError::Unauthorized(_) => 4,
            EvmError::InsufficientFunds(_) => 5,
            EvmError::OutOfGas(_) => 11,
            EvmError::InvalidRequest(_) => 18,
            EvmError::InvalidSigner(_) => 24,
            EvmError::InvalidHeight(_) => 26,
            EvmError::InvalidChainId(_) => 28,
            EvmError::UnknownExtensionOptions(_) => 31,
            EvmError::NotSupported(_) => 37,
        }
    }
}

impl From<EvmError> for ErrorObjectOwned {
    fn from(error: EvmError) -> Self {
        ErrorObjectOwned::owned(SERVER_ERROR_CODE, error.to_string(), None::<String>)
    }
}

/// An error raised inside a precompile frame. Every variant ends the frame; the EVM sees a revert, an
/// exceptional halt or out-of-gas depending on [`PrecompileError::instruction_result`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PrecompileError {
    #[error("precompile not run in EVM")]
    NotRunInEvm,
    #[error("write protection")]
    WriteProtection,
    #[error("{}", RevertError(.0.clone()))]
    ExecutionReverted(Option<Bytes>),
    #[error("out of gas")]
    OutOfGas,
    #[error("max precompile calls reached")]
    MaxPrecompileCalls,
    #[error(transparent)]
    Evm(#[from] EvmError),
}

impl PrecompileError {
    /// A business-logic rejection carrying a human readable reason.
    pub fn revert(reason: impl Display) -> Self {
        PrecompileError::ExecutionReverted(Some(revert_reason_bytes(reason)))
    }

    pub fn instruction_result(&self) -> InstructionResult {
        match self {
            PrecompileError::OutOfGas => InstructionResult::PrecompileOOG,
            PrecompileError::WriteProtection => InstructionResult::StateChangeDuringStaticCall,
            PrecompileError::NotRunInEvm => InstructionResult::PrecompileError,
            PrecompileError::Evm(EvmError::InvalidState(_)) => InstructionResult::FatalExternalError,
            PrecompileError::ExecutionReverted(_)
            | PrecompileError::MaxPrecompileCalls
            | PrecompileError::Evm(_) => InstructionResult::Revert,
        }
    }

    /// The bytes returned to the caller of the failed frame.
    pub fn output(&self) -> Bytes {
        match self {
            PrecompileError::ExecutionReverted(reason) => reason.clone().unwrap_or_default(),
            PrecompileError::OutOfGas | PrecompileError::NotRunInEvm => Bytes::new(),
            other => revert_reason_bytes(other),
        }
    }
}

/// ABI-encodes `reason` as an `Error(string)` revert payload.
pub fn revert_reason_bytes(reason: impl Display) -> Bytes {
    Revert {
        reason: reason.to_string(),
    }
    .abi_encode()
    .into()
}

/// The human readable reason of a revert payload. `Error(string)` payloads yield the bare string. Empty payloads and
/// empty reasons have none.
pub fn revert_reason(output: &[u8]) -> Option<String> {
    if output.is_empty() {
        return None;
    }
    let reason = match Revert::abi_decode(output, true) {
        Ok(revert) => Some(revert.reason),
        Err(_) => decode_revert_reason(output),
    };
    reason.filter(|r| !r.is_empty())
}

/// A reverted execution as reported over JSON-RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertError(Option<Bytes>);

impl RevertError {
    pub fn new(output: Bytes) -> Self {
        RevertError((!output.is_empty()).then_some(output))
    }

    pub fn with_reason(reason: impl Display) -> Self {
        RevertError(Some(revert_reason_bytes(reason)))
    }

    pub fn output(&self) -> Option<&Bytes> {
        self.0.as_ref()
    }

    pub fn error_code(&self) -> i32 {
        EXECUTION_ERROR_CODE
    }
}

impl Error for RevertError {}

impl Display for RevertError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("execution reverted")?;
        if let Some(reason) = self.0.as_ref().and_then(|output| revert_reason(output)) {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}

impl From<RevertError> for ErrorObjectOwned {
    fn from(error: RevertError) -> Self {
        let data = error.0.as_ref().map(hex::encode_prefixed);
        ErrorObjectOwned::owned(error.error_code(), error.to_string(), data)
    }
}
