use alloy::primitives::{Address, B256, U256};

use crate::{
    host::Context,
    keeper::{EvmKeeper, EvmParams},
};

/// Identifies the transaction whose logs a [StateDb](super::StateDb) collects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxConfig {
    pub block_hash: B256,
    pub tx_hash: B256,
    pub tx_index: u64,
    /// Index of the first log of this transaction within the block.
    pub log_index: u64,
}

impl TxConfig {
    pub fn new(block_hash: B256, tx_hash: B256, tx_index: u64, log_index: u64) -> TxConfig {
        TxConfig {
            block_hash,
            tx_hash,
            tx_index,
            log_index,
        }
    }
}

/// The chain rules at the current block, fixed for the duration of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmConfig {
    pub chain_id: u64,
    /// Base fee in wei per gas. `None` when the fee market is disabled.
    pub base_fee: Option<U256>,
    pub coinbase: Address,
    pub block_number: u64,
    pub block_time: u64,
    pub gas_limit: u64,
    pub tx_index: u64,
    pub no_base_fee: bool,
    pub params: EvmParams,
}

impl EvmConfig {
    pub fn from_context(ctx: &Context, keeper: &dyn EvmKeeper) -> EvmConfig {
        let base_fee = keeper.get_base_fee(ctx);
        EvmConfig {
            chain_id: keeper.chain_id(),
            no_base_fee: base_fee.is_none(),
            base_fee,
            coinbase: ctx.header().proposer,
            block_number: ctx.block_height(),
            block_time: ctx.block_time(),
            gas_limit: ctx.header().max_gas.unwrap_or(u64::MAX),
            tx_index: keeper.get_tx_index_transient(ctx),
            params: keeper.get_params(ctx),
        }
    }
}
