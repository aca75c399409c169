use std::sync::Arc;

use alloy::{
    consensus::constants::KECCAK_EMPTY,
    primitives::{Address, B256, Bytes, U256},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    AccountKeeper, BankKeeper, EvmKeeper, FeeMarketKeeper, account::{FEE_COLLECTOR, module_address},
    address_key, decode, decode_amount, encode, encode_amount,
};
use crate::{
    error::EvmError,
    evm::{Evm, VmStateDb},
    host::{Context, GasKvStore},
    precompiles::PrecompileSet,
    statedb::{EvmConfig, StateAccount},
    tracer::Tracer,
    units::{Coin, CoinInfo, Dec},
};

pub const STORE_PREFIX: &[u8] = b"evm/";

const PARAMS: &[u8] = b"params";
const CODE: &[u8] = b"code/";
const CODE_HASH: &[u8] = b"codehash/";
const STATE: &[u8] = b"state/";
const FRACTIONAL: &[u8] = b"fractional/";

const TRANSIENT_GAS_USED: &[u8] = b"gas_used";
const TRANSIENT_TX_INDEX: &[u8] = b"tx_index";
const TRANSIENT_LOG_SIZE: &[u8] = b"log_size";

fn read_transient_u64(ctx: &Context, key: &[u8]) -> u64 {
    ctx.transient_store(STORE_PREFIX)
        .get(key)
        .and_then(|b| <[u8; 8]>::try_from(b.as_slice()).ok())
        .map(u64::from_be_bytes)
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvmParams {
    /// Accept legacy transactions which are not replay protected by EIP-155.
    #[serde(default)]
    pub allow_unprotected_txs: bool,
    #[serde(default = "enabled_default")]
    pub enable_create: bool,
    #[serde(default = "enabled_default")]
    pub enable_call: bool,
    /// Precompile addresses which can be called. Registered precompiles outside this list revert.
    #[serde(default)]
    pub active_static_precompiles: Vec<Address>,
}

pub fn enabled_default() -> bool {
    true
}

impl Default for EvmParams {
    fn default() -> Self {
        EvmParams {
            allow_unprotected_txs: false,
            enable_create: enabled_default(),
            enable_call: enabled_default(),
            active_static_precompiles: Vec::new(),
        }
    }
}

impl EvmParams {
    pub fn is_active_precompile(&self, addr: &Address) -> bool {
        self.active_static_precompiles.contains(addr)
    }
}

/// EVM state on top of the native bank, account and fee market modules.
///
/// Balances are extended to 18 decimals: the native integer balance is scaled by the conversion factor and a
/// fractional remainder (always below the conversion factor) is stored per account by this keeper.
pub struct Keeper {
    coin_info: CoinInfo,
    chain_id: u64,
    bank: Arc<dyn BankKeeper>,
    accounts: Arc<dyn AccountKeeper>,
    fee_market: Arc<dyn FeeMarketKeeper>,
}

impl Keeper {
    pub fn new(
        coin_info: CoinInfo,
        chain_id: u64,
        bank: Arc<dyn BankKeeper>,
        accounts: Arc<dyn AccountKeeper>,
        fee_market: Arc<dyn FeeMarketKeeper>,
    ) -> Result<Keeper, EvmError> {
        coin_info.validate()?;
        if chain_id == 0 {
            return Err(EvmError::InvalidChainConfig("chain id must not be zero".to_owned()));
        }
        Ok(Keeper {
            coin_info,
            chain_id,
            bank,
            accounts,
            fee_market,
        })
    }

    fn store(&self, ctx: &Context) -> GasKvStore {
        ctx.kv_store(STORE_PREFIX)
    }

    pub fn fractional_balance(&self, ctx: &Context, addr: Address) -> U256 {
        self.store(ctx)
            .get(&address_key(FRACTIONAL, addr))
            .map(|v| decode_amount(&v))
            .unwrap_or_default()
    }

    fn set_fractional_balance(&self, ctx: &Context, addr: Address, amount: U256) {
        let key = address_key(FRACTIONAL, addr);
        if amount.is_zero() {
            self.store(ctx).delete(&key);
        } else {
            self.store(ctx).set(&key, encode_amount(amount));
        }
    }

    fn native(&self, amount: U256) -> [Coin; 1] {
        [self.coin_info.native_coin(amount)]
    }

    fn code_hash(&self, ctx: &Context, addr: Address) -> B256 {
        self.store(ctx)
            .get(&address_key(CODE_HASH, addr))
            .map(|v| B256::from_slice(&v))
            .unwrap_or(KECCAK_EMPTY)
    }

    fn state_key(addr: Address, key: B256) -> Vec<u8> {
        let mut full = address_key(STATE, addr);
        full.extend_from_slice(key.as_slice());
        full
    }
}

impl EvmKeeper for Keeper {
    fn coin_info(&self) -> &CoinInfo {
        &self.coin_info
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn get_params(&self, ctx: &Context) -> EvmParams {
        let Some(bytes) = self.store(ctx).get(PARAMS) else {
            return EvmParams::default();
        };
        decode(&bytes).unwrap_or_else(|e| {
            warn!(%e, "invalid evm params, using defaults");
            EvmParams::default()
        })
    }

    fn set_params(&self, ctx: &Context, params: &EvmParams) -> Result<(), EvmError> {
        self.store(ctx).set(PARAMS, encode(params)?);
        Ok(())
    }

    fn get_base_fee(&self, ctx: &Context) -> Option<U256> {
        if !self.fee_market.get_base_fee_enabled(ctx) {
            return None;
        }
        let base_fee = self.fee_market.get_base_fee(ctx);
        let scaled = base_fee.checked_mul_int(self.coin_info.conversion_factor())?;
        Some(scaled.truncate_int())
    }

    fn get_min_gas_price(&self, ctx: &Context) -> Dec {
        let min_gas_price = self.fee_market.get_params(ctx).min_gas_price;
        min_gas_price
            .checked_mul_int(self.coin_info.conversion_factor())
            .unwrap_or(Dec::from_raw(U256::MAX))
    }

    fn deduct_tx_costs_from_user_balance(
        &self,
        ctx: &Context,
        fees: &[Coin],
        from: Address,
    ) -> Result<(), EvmError> {
        if let Some(coin) = fees.iter().find(|c| c.denom != self.coin_info.base_denom) {
            return Err(EvmError::InvalidAmount(format!(
                "fee {coin} is not in the base denom {}",
                self.coin_info.base_denom
            )));
        }
        self.bank
            .send_coins(ctx, from, module_address(FEE_COLLECTOR), fees)
            .map_err(|e| {
                EvmError::InsufficientFunds(format!("failed to deduct full gas cost: {e}"))
            })
    }

    fn refund_gas(
        &self,
        ctx: &Context,
        to: Address,
        leftover: u64,
        price: U256,
    ) -> Result<(), EvmError> {
        let wei = price
            .checked_mul(U256::from(leftover))
            .ok_or_else(|| EvmError::GasOverflow("refund amount".to_owned()))?;
        let native = self.coin_info.wei_to_native(wei);
        if native.is_zero() {
            return Ok(());
        }
        self.bank
            .send_coins(ctx, module_address(FEE_COLLECTOR), to, &self.native(native))
            .map_err(|e| EvmError::InvalidRefund(format!("fee collector cannot refund: {e}")))
    }

    fn reset_transient_gas_used(&self, ctx: &Context) {
        ctx.transient_store(STORE_PREFIX).delete(TRANSIENT_GAS_USED);
    }

    fn get_transient_gas_used(&self, ctx: &Context) -> u64 {
        read_transient_u64(ctx, TRANSIENT_GAS_USED)
    }

    fn set_transient_gas_used(&self, ctx: &Context, gas: u64) {
        ctx.transient_store(STORE_PREFIX)
            .set(TRANSIENT_GAS_USED, gas.to_be_bytes().to_vec());
    }

    fn get_tx_index_transient(&self, ctx: &Context) -> u64 {
        read_transient_u64(ctx, TRANSIENT_TX_INDEX)
    }

    fn set_tx_index_transient(&self, ctx: &Context, index: u64) {
        ctx.transient_store(STORE_PREFIX)
            .set(TRANSIENT_TX_INDEX, index.to_be_bytes().to_vec());
    }

    fn get_log_size_transient(&self, ctx: &Context) -> u64 {
        read_transient_u64(ctx, TRANSIENT_LOG_SIZE)
    }

    fn set_log_size_transient(&self, ctx: &Context, size: u64) {
        ctx.transient_store(STORE_PREFIX)
            .set(TRANSIENT_LOG_SIZE, size.to_be_bytes().to_vec());
    }

    fn get_balance(&self, ctx: &Context, addr: Address) -> U256 {
        let native = self
            .bank
            .get_balance(ctx, addr, &self.coin_info.base_denom)
            .amount;
        // Native supply is far below the 256 bit range once scaled, so saturation never hides value in practice.
        native
            .saturating_mul(self.coin_info.conversion_factor())
            .saturating_add(self.fractional_balance(ctx, addr))
    }

    fn spendable_coin(&self, ctx: &Context, addr: Address) -> U256 {
        let native = self
            .bank
            .spendable_coin(ctx, addr, &self.coin_info.base_denom)
            .amount;
        native
            .saturating_mul(self.coin_info.conversion_factor())
            .saturating_add(self.fractional_balance(ctx, addr))
    }

    fn set_balance(&self, ctx: &Context, addr: Address, wei: U256) -> Result<(), EvmError> {
        let (integer, fractional) = self.coin_info.split_wei(wei);
        let current = self
            .bank
            .get_balance(ctx, addr, &self.coin_info.base_denom)
            .amount;
        if integer > current {
            self.bank
                .mint_coins(ctx, addr, &self.native(integer - current))?;
        } else if integer < current {
            self.bank
                .burn_coins(ctx, addr, &self.native(current - integer))?;
        }
        self.set_fractional_balance(ctx, addr, fractional);
        Ok(())
    }

    fn send_extended(
        &self,
        ctx: &Context,
        from: Address,
        to: Address,
        wei: U256,
    ) -> Result<(), EvmError> {
        if wei.is_zero() || from == to {
            return Ok(());
        }
        let spendable = self.spendable_coin(ctx, from);
        if spendable < wei {
            return Err(EvmError::InsufficientFunds(format!(
                "spendable balance {spendable} is smaller than {wei}"
            )));
        }

        let cf = self.coin_info.conversion_factor();
        let (integer, fractional) = self.coin_info.split_wei(wei);
        let from_fractional = self.fractional_balance(ctx, from);
        let to_fractional = self.fractional_balance(ctx, to);

        // The sender borrows one native unit when its remainder is too small, the receiver carries one when its
        // remainder overflows.
        let borrow = from_fractional < fractional;
        let new_from_fractional = if borrow {
            from_fractional + cf - fractional
        } else {
            from_fractional - fractional
        };
        let sum = to_fractional + fractional;
        let carry = sum >= cf;
        let new_to_fractional = if carry { sum - cf } else { sum };

        let one = U256::from(1);
        match (borrow, carry) {
            (false, false) => self.bank.send_coins(ctx, from, to, &self.native(integer))?,
            (true, true) => self
                .bank
                .send_coins(ctx, from, to, &self.native(integer + one))?,
            (true, false) => {
                self.bank.send_coins(ctx, from, to, &self.native(integer))?;
                self.bank.burn_coins(ctx, from, &self.native(one))?;
            }
            (false, true) => {
                self.bank.send_coins(ctx, from, to, &self.native(integer))?;
                self.bank.mint_coins(ctx, to, &self.native(one))?;
            }
        }
        self.set_fractional_balance(ctx, from, new_from_fractional);
        self.set_fractional_balance(ctx, to, new_to_fractional);
        debug!(%from, %to, %wei, borrow, carry, "extended send");
        Ok(())
    }

    fn get_account(&self, ctx: &Context, addr: Address) -> Option<StateAccount> {
        let account = self.accounts.get_account(ctx, addr);
        let balance = self.get_balance(ctx, addr);
        let code_hash = self.code_hash(ctx, addr);
        if account.is_none() && balance.is_zero() && code_hash == KECCAK_EMPTY {
            return None;
        }
        Some(StateAccount {
            nonce: account.map(|a| a.sequence).unwrap_or_default(),
            balance,
            code_hash,
        })
    }

    fn set_account(
        &self,
        ctx: &Context,
        addr: Address,
        account: &StateAccount,
    ) -> Result<(), EvmError> {
        let mut record = self
            .accounts
            .get_account(ctx, addr)
            .unwrap_or_else(|| self.accounts.new_account_with_address(ctx, addr));
        record.sequence = account.nonce;
        self.accounts.set_account(ctx, &record);

        self.set_balance(ctx, addr, account.balance)?;

        let key = address_key(CODE_HASH, addr);
        if account.code_hash == KECCAK_EMPTY {
            self.store(ctx).delete(&key);
        } else {
            self.store(ctx).set(&key, account.code_hash.to_vec());
        }
        Ok(())
    }

    fn delete_account(&self, ctx: &Context, addr: Address) -> Result<(), EvmError> {
        let store = self.store(ctx);
        for (key, _) in store.iter_prefix(&address_key(STATE, addr)) {
            store.delete(&key);
        }
        store.delete(&address_key(CODE_HASH, addr));
        self.set_balance(ctx, addr, U256::ZERO)?;
        self.accounts.remove_account(ctx, addr);
        Ok(())
    }

    fn get_state(&self, ctx: &Context, addr: Address, key: B256) -> B256 {
        self.store(ctx)
            .get(&Self::state_key(addr, key))
            .map(|v| B256::from_slice(&v))
            .unwrap_or_default()
    }

    fn set_state(&self, ctx: &Context, addr: Address, key: B256, value: B256) {
        let key = Self::state_key(addr, key);
        if value.is_zero() {
            self.store(ctx).delete(&key);
        } else {
            self.store(ctx).set(&key, value.to_vec());
        }
    }

    fn get_code(&self, ctx: &Context, code_hash: B256) -> Bytes {
        if code_hash == KECCAK_EMPTY {
            return Bytes::new();
        }
        let mut key = CODE.to_vec();
        key.extend_from_slice(code_hash.as_slice());
        self.store(ctx).get(&key).map(Bytes::from).unwrap_or_default()
    }

    fn set_code(&self, ctx: &Context, code_hash: B256, code: &[u8]) {
        let mut key = CODE.to_vec();
        key.extend_from_slice(code_hash.as_slice());
        if code.is_empty() {
            self.store(ctx).delete(&key);
        } else {
            self.store(ctx).set(&key, code.to_vec());
        }
    }

    fn new_evm<'a>(
        &self,
        _ctx: &Context,
        config: EvmConfig,
        tracer: Option<Box<dyn Tracer + 'a>>,
        state_db: &'a mut dyn VmStateDb,
        precompiles: &'a PrecompileSet,
    ) -> Evm<'a> {
        let evm = Evm::new(state_db, config, precompiles);
        match tracer {
            Some(tracer) => evm.with_tracer(tracer),
            None => evm,
        }
    }
}
