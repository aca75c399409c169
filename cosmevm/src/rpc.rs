//! Read-only Ethereum JSON-RPC queries over committed chain state.
//!
//! Everything the backend needs is passed to [RpcBackend::new]. Queries run against contexts built by a
//! [ContextFactory], so they never observe or disturb the state of a transaction in progress.

use std::{collections::BTreeMap, sync::Arc};

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, B256, Bytes, U64, U256},
};
use anyhow::Result;
use jsonrpsee::{
    RpcModule,
    types::{ErrorObjectOwned, Params, error::ErrorCode, params::ParamsSequence},
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    constants::RPC_RETAINED_HEIGHTS,
    error::EvmError,
    host::{Context, GasConfig, InfiniteGasMeter},
    keeper::{AccountKeeper, BankReader, EvmKeeper},
};

/// Builds query contexts over committed state.
pub trait ContextFactory: Send + Sync {
    fn latest_height(&self) -> u64;
    /// A context over the state committed at `height`.
    fn context_at(&self, height: u64) -> Result<Context, EvmError>;
}

/// Keeps a detached copy of the state committed at each of the most recent heights.
#[derive(Debug)]
pub struct CommittedContexts {
    contexts: RwLock<BTreeMap<u64, Context>>,
    retained: usize,
}

impl Default for CommittedContexts {
    fn default() -> Self {
        CommittedContexts::with_retention(RPC_RETAINED_HEIGHTS)
    }
}

impl CommittedContexts {
    pub fn new() -> CommittedContexts {
        CommittedContexts::default()
    }

    /// Keeps at most `retained` heights, and always the latest.
    pub fn with_retention(retained: usize) -> CommittedContexts {
        CommittedContexts {
            contexts: RwLock::default(),
            retained: retained.max(1),
        }
    }

    /// Records the state of `ctx` as committed at its block height.
    pub fn commit(&self, ctx: &Context) {
        let height = ctx.block_height();
        let snapshot = ctx
            .with_multi_store(ctx.multi_store().fork())
            .with_gas_meter(Arc::new(InfiniteGasMeter::new()))
            .with_kv_gas_config(GasConfig::zero())
            .with_transient_kv_gas_config(GasConfig::zero());
        let mut contexts = self.contexts.write();
        contexts.insert(height, snapshot);
        while contexts.len() > self.retained {
            if let Some((pruned, _)) = contexts.pop_first() {
                trace!(height = pruned, "pruned committed state");
            }
        }
        debug!(height, "recorded committed state");
    }
}

impl ContextFactory for CommittedContexts {
    fn latest_height(&self) -> u64 {
        self.contexts
            .read()
            .last_key_value()
            .map(|(height, _)| *height)
            .unwrap_or_default()
    }

    fn context_at(&self, height: u64) -> Result<Context, EvmError> {
        let contexts = self.contexts.read();
        // A height without a block of its own sees the state of the last block before it.
        contexts
            .range(..=height)
            .next_back()
            .map(|(_, ctx)| ctx.clone())
            .ok_or_else(|| EvmError::InvalidHeight(format!("no state committed at height {height}")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceSourceKind {
    #[default]
    EvmState,
    Bank,
}

/// Where `eth_getBalance` reads balances from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceSource {
    /// The extended balance in wei, as the EVM sees it.
    EvmState,
    /// The bank balance of the base denom multiplied by `10^scale_exponent`.
    Bank { scale_exponent: u8 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcConfig {
    #[serde(default)]
    pub balance_source: BalanceSourceKind,
    /// Only used with the `bank` balance source.
    #[serde(default)]
    pub scale_exponent: u8,
}

impl RpcConfig {
    pub fn balance_source(&self) -> BalanceSource {
        match self.balance_source {
            BalanceSourceKind::EvmState => BalanceSource::EvmState,
            BalanceSourceKind::Bank => BalanceSource::Bank {
                scale_exponent: self.scale_exponent,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProof {
    pub key: B256,
    pub value: U256,
    pub proof: Vec<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProof {
    pub address: Address,
    pub balance: U256,
    pub nonce: U64,
    pub code_hash: B256,
    /// Always zero: accounts have no storage root of their own.
    pub storage_hash: B256,
    pub account_proof: Vec<Bytes>,
    pub storage_proof: Vec<StorageProof>,
}

pub struct RpcBackend {
    bank: Arc<dyn BankReader>,
    base_denom: String,
    contexts: Arc<dyn ContextFactory>,
    evm_keeper: Arc<dyn EvmKeeper>,
    accounts: Arc<dyn AccountKeeper>,
    balance_source: BalanceSource,
}

impl RpcBackend {
    pub fn new(
        bank: Arc<dyn BankReader>,
        base_denom: impl Into<String>,
        contexts: Arc<dyn ContextFactory>,
        evm_keeper: Arc<dyn EvmKeeper>,
        accounts: Arc<dyn AccountKeeper>,
        config: &RpcConfig,
    ) -> Result<RpcBackend, EvmError> {
        let base_denom = base_denom.into();
        if base_denom.is_empty() {
            return Err(EvmError::InvalidChainConfig(
                "RPC backend requires a base denom".to_owned(),
            ));
        }
        let balance_source = config.balance_source();
        if let BalanceSource::Bank { scale_exponent } = balance_source
            && scale_exponent > 18
        {
            return Err(EvmError::InvalidChainConfig(format!(
                "balance scale exponent {scale_exponent} exceeds 18"
            )));
        }
        Ok(RpcBackend {
            bank,
            base_denom,
            contexts,
            evm_keeper,
            accounts,
            balance_source,
        })
    }

    pub fn balance_source(&self) -> BalanceSource {
        self.balance_source
    }

    /// Maps a block parameter to a committed height. Tags which name a block in progress resolve to the latest
    /// committed one.
    pub fn resolve_height(&self, block: BlockNumberOrTag) -> Result<u64, EvmError> {
        let latest = self.contexts.latest_height();
        match block {
            BlockNumberOrTag::Latest
            | BlockNumberOrTag::Pending
            | BlockNumberOrTag::Safe
            | BlockNumberOrTag::Finalized => Ok(latest),
            BlockNumberOrTag::Earliest | BlockNumberOrTag::Number(0) => Ok(1),
            BlockNumberOrTag::Number(height) if height > latest => Err(EvmError::InvalidHeight(format!(
                "height {height} must be less than or equal to the current blockchain height {latest}"
            ))),
            BlockNumberOrTag::Number(height) => Ok(height),
        }
    }

    fn context(&self, block: BlockNumberOrTag) -> Result<Context, EvmError> {
        let height = self.resolve_height(block)?;
        trace!(%block, height, "query context");
        self.contexts.context_at(height)
    }

    pub fn get_balance(&self, address: Address, block: BlockNumberOrTag) -> Result<U256, EvmError> {
        let ctx = self.context(block)?;
        match self.balance_source {
            BalanceSource::EvmState => Ok(self.evm_keeper.get_balance(&ctx, address)),
            BalanceSource::Bank { scale_exponent } => {
                let coin = self.bank.get_balance(&ctx, address, &self.base_denom);
                coin.amount
                    .checked_mul(U256::from(10).pow(U256::from(scale_exponent)))
                    .ok_or_else(|| EvmError::InvalidAmount(format!("scaled balance of {address} overflows")))
            }
        }
    }

    pub fn get_transaction_count(&self, address: Address, block: BlockNumberOrTag) -> Result<u64, EvmError> {
        let ctx = self.context(block)?;
        Ok(self
            .accounts
            .get_account(&ctx, address)
            .map(|a| a.sequence)
            .unwrap_or_default())
    }

    pub fn get_code(&self, address: Address, block: BlockNumberOrTag) -> Result<Bytes, EvmError> {
        let ctx = self.context(block)?;
        let Some(account) = self.evm_keeper.get_account(&ctx, address) else {
            return Ok(Bytes::new());
        };
        if !account.is_contract() {
            return Ok(Bytes::new());
        }
        Ok(self.evm_keeper.get_code(&ctx, account.code_hash))
    }

    pub fn get_storage_at(&self, address: Address, key: B256, block: BlockNumberOrTag) -> Result<B256, EvmError> {
        let ctx = self.context(block)?;
        Ok(self.evm_keeper.get_state(&ctx, address, key))
    }

    /// The account and the requested storage values. No Merkle proofs are produced.
    pub fn get_proof(
        &self,
        address: Address,
        keys: &[B256],
        block: BlockNumberOrTag,
    ) -> Result<AccountProof, EvmError> {
        let ctx = self.context(block)?;
        let account = self.evm_keeper.get_account(&ctx, address).unwrap_or_default();
        let storage_proof = keys
            .iter()
            .map(|key| StorageProof {
                key: *key,
                value: self.evm_keeper.get_state(&ctx, address, *key).into(),
                proof: vec![],
            })
            .collect();
        Ok(AccountProof {
            address,
            balance: self.get_balance(address, block)?,
            nonce: U64::from(account.nonce),
            code_hash: account.code_hash,
            storage_hash: B256::ZERO,
            account_proof: vec![],
            storage_proof,
        })
    }
}

macro_rules! declare_module {
    (
        $backend:expr,
        [ $(($name:expr, $method:expr)),* $(,)? ] $(,)?
    ) => {{
        let mut module: RpcModule<Arc<RpcBackend>> = RpcModule::new($backend);
        $(
            module
                .register_method($name, move |params, backend, _| {
                    $method(params, backend).map_err(into_error_object)
                })
                .map_err(|e| anyhow::anyhow!("failed to register {}: {e}", $name))?;
        )*
        module
    }};
}

/// Parameter errors are passed through as they are; keeper errors carry the server error code.
fn into_error_object(e: anyhow::Error) -> ErrorObjectOwned {
    let e = match e.downcast::<ErrorObjectOwned>() {
        Ok(e) => return e,
        Err(e) => e,
    };
    match e.downcast::<EvmError>() {
        Ok(e) => e.into(),
        Err(e) => ErrorObjectOwned::owned(ErrorCode::InternalError.code(), e.to_string(), None::<String>),
    }
}

/// The `eth_*` state query methods served by `backend`.
pub fn rpc_module(backend: Arc<RpcBackend>) -> Result<RpcModule<Arc<RpcBackend>>> {
    Ok(declare_module!(
        backend,
        [
            ("eth_getBalance", get_balance),
            ("eth_getTransactionCount", get_transaction_count),
            ("eth_getCode", get_code),
            ("eth_getStorageAt", get_storage_at),
            ("eth_getProof", get_proof),
        ],
    ))
}

fn block_param(params: &mut ParamsSequence<'_>) -> Result<BlockNumberOrTag> {
    Ok(params.optional_next()?.unwrap_or(BlockNumberOrTag::Latest))
}

fn get_balance(params: Params, backend: &Arc<RpcBackend>) -> Result<U256> {
    let mut params = params.sequence();
    let address: Address = params.next()?;
    let block = block_param(&mut params)?;
    Ok(backend.get_balance(address, block)?)
}

fn get_transaction_count(params: Params, backend: &Arc<RpcBackend>) -> Result<U64> {
    let mut params = params.sequence();
    let address: Address = params.next()?;
    let block = block_param(&mut params)?;
    Ok(U64::from(backend.get_transaction_count(address, block)?))
}

fn get_code(params: Params, backend: &Arc<RpcBackend>) -> Result<Bytes> {
    let mut params = params.sequence();
    let address: Address = params.next()?;
    let block = block_param(&mut params)?;
    Ok(backend.get_code(address, block)?)
}

fn get_storage_at(params: Params, backend: &Arc<RpcBackend>) -> Result<B256> {
    let mut params = params.sequence();
    let address: Address = params.next()?;
    let position: U256 = params.next()?;
    let block = block_param(&mut params)?;
    Ok(backend.get_storage_at(address, B256::from(position), block)?)
}

fn get_proof(params: Params, backend: &Arc<RpcBackend>) -> Result<AccountProof> {
    let mut params = params.sequence();
    let address: Address = params.next()?;
    let keys: Vec<U256> = params.next()?;
    let keys: Vec<B256> = keys.into_iter().map(B256::from).collect();
    let block = block_param(&mut params)?;
    Ok(backend.get_proof(address, &keys, block)?)
}
