use std::collections::HashMap;

use alloy::{
    consensus::constants::KECCAK_EMPTY,
    primitives::{Address, B256, Bytes, U256},
};

/// The EVM's view of an account: its nonce, extended balance and code hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateAccount {
    pub nonce: u64,
    /// Balance in wei.
    pub balance: U256,
    pub code_hash: B256,
}

impl Default for StateAccount {
    fn default() -> Self {
        StateAccount {
            nonce: 0,
            balance: U256::ZERO,
            code_hash: KECCAK_EMPTY,
        }
    }
}

impl StateAccount {
    pub fn is_contract(&self) -> bool {
        self.code_hash != KECCAK_EMPTY
    }
}

/// An account loaded into a [StateDb](super::StateDb) together with its cached code and storage.
#[derive(Debug, Clone)]
pub(crate) struct StateObject {
    pub address: Address,
    pub account: StateAccount,
    /// Loaded lazily.
    pub code: Option<Bytes>,
    pub dirty_code: bool,
    /// Slot values as they are in the store.
    pub origin_storage: HashMap<B256, B256>,
    /// Slot values written during this transaction.
    pub dirty_storage: HashMap<B256, B256>,
}

impl StateObject {
    pub fn new(address: Address, account: StateAccount) -> StateObject {
        StateObject {
            address,
            account,
            code: None,
            dirty_code: false,
            origin_storage: HashMap::new(),
            dirty_storage: HashMap::new(),
        }
    }

    /// EIP-161 emptiness.
    pub fn is_empty(&self) -> bool {
        self.account.nonce == 0
            && self.account.balance.is_zero()
            && self.account.code_hash == KECCAK_EMPTY
    }
}
