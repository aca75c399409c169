// Minimum gas required for an EVM transaction (without input data)
pub const TX_GAS: u64 = 21_000;

// Minimum gas required for a contract creation transaction (without input data)
pub const TX_GAS_CONTRACT_CREATION: u64 = 53_000;

// Intrinsic gas per byte of calldata
pub const TX_DATA_ZERO_GAS: u64 = 4;
pub const TX_DATA_NON_ZERO_GAS: u64 = 16;

// Maximum depth of nested EVM calls
pub const CALL_DEPTH_LIMIT: usize = 1024;

// Maximum number of precompile calls recorded in a single transaction
pub const MAX_PRECOMPILE_CALLS: usize = 7;

// Maximum size of a transaction's calldata (4 slots of 32KB)
pub const MAX_TX_INPUT_SIZE: usize = 4 * 32 * 1024;

// Number of committed heights whose state stays queryable over RPC
pub const RPC_RETAINED_HEIGHTS: usize = 128;

/// The intrinsic gas of a transaction carrying `data`.
pub fn intrinsic_gas(data: &[u8], is_create: bool) -> Option<u64> {
    let base = if is_create {
        TX_GAS_CONTRACT_CREATION
    } else {
        TX_GAS
    };
    data.iter().try_fold(base, |acc, byte| {
        acc.checked_add(if *byte == 0 {
            TX_DATA_ZERO_GAS
        } else {
            TX_DATA_NON_ZERO_GAS
        })
    })
}
