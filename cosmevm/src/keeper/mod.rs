//! Module keepers. The traits are the capabilities the EVM core consumes; each submodule also provides a store-backed
//! implementation over a [Context](crate::host::Context).

pub mod account;
pub mod bank;
pub mod evm;
pub mod feemarket;

use alloy::primitives::{Address, B256, Bytes, U256};
use serde::{Serialize, de::DeserializeOwned};

pub use self::{
    account::{Account, AccountKind},
    evm::EvmParams,
    feemarket::FeeMarketParams,
};
use crate::{
    error::EvmError,
    evm::{Evm, VmStateDb},
    host::Context,
    precompiles::PrecompileSet,
    statedb::{EvmConfig, StateAccount},
    tracer::Tracer,
    units::{Coin, CoinInfo, Dec},
};

/// Read access to native balances, as needed by query paths.
pub trait BankReader: Send + Sync {
    fn get_balance(&self, ctx: &Context, addr: Address, denom: &str) -> Coin;
}

pub trait BankKeeper: BankReader {
    /// The part of the balance which is not locked.
    fn spendable_coin(&self, ctx: &Context, addr: Address, denom: &str) -> Coin;
    fn send_coins(
        &self,
        ctx: &Context,
        from: Address,
        to: Address,
        coins: &[Coin],
    ) -> Result<(), EvmError>;
    fn mint_coins(&self, ctx: &Context, to: Address, coins: &[Coin]) -> Result<(), EvmError>;
    fn burn_coins(&self, ctx: &Context, from: Address, coins: &[Coin]) -> Result<(), EvmError>;
    fn get_supply(&self, ctx: &Context, denom: &str) -> Coin;
}

pub trait AccountKeeper: Send + Sync {
    fn get_account(&self, ctx: &Context, addr: Address) -> Option<Account>;
    /// Builds a new base account with the next account number. The account is not stored.
    fn new_account_with_address(&self, ctx: &Context, addr: Address) -> Account;
    fn set_account(&self, ctx: &Context, account: &Account);
    fn remove_account(&self, ctx: &Context, addr: Address);
    fn get_sequence(&self, ctx: &Context, addr: Address) -> Result<u64, EvmError>;
}

pub trait FeeMarketKeeper: Send + Sync {
    fn get_params(&self, ctx: &Context) -> FeeMarketParams;
    fn set_params(&self, ctx: &Context, params: &FeeMarketParams) -> Result<(), EvmError>;
    /// The base fee in native units per gas.
    fn get_base_fee(&self, ctx: &Context) -> Dec;
    fn get_base_fee_enabled(&self, ctx: &Context) -> bool;
    /// Adds `gas` to the block's transient gas wanted and returns the new total.
    fn add_transient_gas_wanted(&self, ctx: &Context, gas: u64) -> Result<u64, EvmError>;
    fn get_transient_gas_wanted(&self, ctx: &Context) -> u64;
}

pub trait EvmKeeper: Send + Sync {
    fn coin_info(&self) -> &CoinInfo;
    /// The EIP-155 chain id.
    fn chain_id(&self) -> u64;
    fn get_params(&self, ctx: &Context) -> EvmParams;
    fn set_params(&self, ctx: &Context, params: &EvmParams) -> Result<(), EvmError>;

    /// The base fee in wei per gas, or `None` when the fee market has it disabled.
    fn get_base_fee(&self, ctx: &Context) -> Option<U256>;
    /// The minimum gas price in wei per gas.
    fn get_min_gas_price(&self, ctx: &Context) -> Dec;
    fn deduct_tx_costs_from_user_balance(
        &self,
        ctx: &Context,
        fees: &[Coin],
        from: Address,
    ) -> Result<(), EvmError>;
    /// Returns `leftover` gas at `price` wei per gas from the fee collector to `to`.
    fn refund_gas(
        &self,
        ctx: &Context,
        to: Address,
        leftover: u64,
        price: U256,
    ) -> Result<(), EvmError>;

    fn reset_transient_gas_used(&self, ctx: &Context);
    fn get_transient_gas_used(&self, ctx: &Context) -> u64;
    fn set_transient_gas_used(&self, ctx: &Context, gas: u64);
    fn get_tx_index_transient(&self, ctx: &Context) -> u64;
    fn set_tx_index_transient(&self, ctx: &Context, index: u64);
    /// Number of EVM logs emitted by the block's transactions so far.
    fn get_log_size_transient(&self, ctx: &Context) -> u64;
    fn set_log_size_transient(&self, ctx: &Context, size: u64);

    /// The extended balance in wei: the native balance scaled to 18 decimals plus the fractional remainder.
    fn get_balance(&self, ctx: &Context, addr: Address) -> U256;
    /// Like [EvmKeeper::get_balance], but counting only the spendable native balance.
    fn spendable_coin(&self, ctx: &Context, addr: Address) -> U256;
    fn set_balance(&self, ctx: &Context, addr: Address, wei: U256) -> Result<(), EvmError>;
    /// Moves `wei` between extended balances, carrying between the fractional and native parts.
    fn send_extended(
        &self,
        ctx: &Context,
        from: Address,
        to: Address,
        wei: U256,
    ) -> Result<(), EvmError>;

    fn get_account(&self, ctx: &Context, addr: Address) -> Option<StateAccount>;
    fn set_account(
        &self,
        ctx: &Context,
        addr: Address,
        account: &StateAccount,
    ) -> Result<(), EvmError>;
    fn delete_account(&self, ctx: &Context, addr: Address) -> Result<(), EvmError>;
    fn get_state(&self, ctx: &Context, addr: Address, key: B256) -> B256;
    fn set_state(&self, ctx: &Context, addr: Address, key: B256, value: B256);
    fn get_code(&self, ctx: &Context, code_hash: B256) -> Bytes;
    fn set_code(&self, ctx: &Context, code_hash: B256, code: &[u8]);

    fn new_evm<'a>(
        &self,
        ctx: &Context,
        config: EvmConfig,
        tracer: Option<Box<dyn Tracer + 'a>>,
        state_db: &'a mut dyn VmStateDb,
        precompiles: &'a PrecompileSet,
    ) -> Evm<'a>;
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, EvmError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| EvmError::InvalidState(format!("failed to encode record: {e}")))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, EvmError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| EvmError::InvalidState(format!("failed to decode record: {e}")))
}

pub(crate) fn encode_amount(amount: U256) -> Vec<u8> {
    amount.to_be_bytes::<32>().to_vec()
}

pub(crate) fn decode_amount(bytes: &[u8]) -> U256 {
    U256::from_be_slice(bytes)
}

pub(crate) fn address_key(prefix: &[u8], addr: Address) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(addr.as_slice());
    key
}
