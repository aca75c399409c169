//! Validation of chain transactions carrying an EVM message, before the message executes.
//!
//! The guards run in a fixed order against a branch of the context. The branch is written back only if every guard
//! passes, so a rejected transaction leaves no nonce increment, fee deduction or gas tally behind.

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use alloy::primitives::{Address, U256};
use tracing::{debug, warn};

use crate::{
    constants::MAX_TX_INPUT_SIZE,
    error::EvmError,
    host::{Context, GasConfig, InfiniteGasMeter},
    keeper::{AccountKeeper, EvmKeeper, FeeMarketKeeper},
    transaction::{CosmosTx, EXTENSION_OPTIONS_ETHEREUM_TX, Msg, MsgEthereumTx, VerifiedTransaction},
    units::{Coin, Dec},
};

/// The ante guards, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Shape,
    Signature,
    ChainId,
    Nonce,
    MinGasPrice,
    BaseFee,
    FeeDeduction,
    GasWanted,
}

impl Display for Guard {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Guard::Shape => "shape",
            Guard::Signature => "signature",
            Guard::ChainId => "chain id",
            Guard::Nonce => "nonce",
            Guard::MinGasPrice => "min gas price",
            Guard::BaseFee => "base fee",
            Guard::FeeDeduction => "fee deduction",
            Guard::GasWanted => "gas wanted",
        };
        f.write_str(name)
    }
}

/// A transaction which passed every guard, with the context it executes in.
#[derive(Debug, Clone)]
pub struct AnteOutcome {
    /// The transaction's context, metered with an infinite gas meter and free KV access.
    pub ctx: Context,
    pub tx: VerifiedTransaction,
    /// Base fee in wei per gas, if the fee market is enabled.
    pub base_fee: Option<U256>,
    /// Price per gas in wei.
    pub effective_gas_price: U256,
    /// The fee deducted from the sender, in the native denom.
    pub fee: Coin,
}

/// Replaces the gas meter with an infinite one and turns off KV gas. Gas inside an EVM execution is accounted by the
/// EVM itself.
pub fn build_evm_execution_ctx(ctx: &Context) -> Context {
    ctx.with_gas_meter(Arc::new(InfiniteGasMeter::new()))
        .with_kv_gas_config(GasConfig::zero())
        .with_transient_kv_gas_config(GasConfig::zero())
}

pub struct AnteHandler {
    evm_keeper: Arc<dyn EvmKeeper>,
    accounts: Arc<dyn AccountKeeper>,
    fee_market: Arc<dyn FeeMarketKeeper>,
}

fn check<T>(guard: Guard, result: Result<T, EvmError>) -> Result<T, EvmError> {
    if let Err(e) = &result {
        warn!(%guard, %e, code = e.code(), codespace = e.codespace(), "ante guard rejected transaction");
    }
    result
}

impl AnteHandler {
    pub fn new(
        evm_keeper: Arc<dyn EvmKeeper>,
        accounts: Arc<dyn AccountKeeper>,
        fee_market: Arc<dyn FeeMarketKeeper>,
    ) -> AnteHandler {
        AnteHandler {
            evm_keeper,
            accounts,
            fee_market,
        }
    }

    /// Runs every guard against `tx`. On success the guards' effects are written to `ctx`; on failure nothing is.
    pub fn handle(&self, ctx: &Context, tx: &CosmosTx) -> Result<AnteOutcome, EvmError> {
        let cache = ctx.cache_context();
        let outcome = self.run_guards(cache.context(), tx)?;
        cache.write();
        debug!(hash = %outcome.tx.hash, signer = %outcome.tx.signer, "transaction passed ante");
        Ok(AnteOutcome {
            ctx: build_evm_execution_ctx(ctx),
            ..outcome
        })
    }

    fn run_guards(&self, ctx: &Context, tx: &CosmosTx) -> Result<AnteOutcome, EvmError> {
        let msg = check(Guard::Shape, check_shape(tx))?;
        let verified = check(Guard::Signature, self.check_signature(ctx, msg))?;
        check(Guard::ChainId, self.check_chain_id(&verified))?;
        check(Guard::Nonce, self.check_nonce(ctx, &verified))?;

        let base_fee = self.evm_keeper.get_base_fee(ctx);
        let effective_gas_price = verified.tx.effective_gas_price(base_fee);
        check(
            Guard::MinGasPrice,
            self.check_min_gas_price(ctx, effective_gas_price),
        )?;
        check(Guard::BaseFee, check_base_fee(&verified, base_fee))?;
        let fee = check(
            Guard::FeeDeduction,
            self.deduct_fee(ctx, &verified, base_fee),
        )?;
        check(Guard::GasWanted, self.add_gas_wanted(ctx, &verified))?;
        self.evm_keeper.reset_transient_gas_used(ctx);

        Ok(AnteOutcome {
            ctx: ctx.clone(),
            tx: verified,
            base_fee,
            effective_gas_price,
            fee,
        })
    }

    fn check_signature(&self, ctx: &Context, msg: &MsgEthereumTx) -> Result<VerifiedTransaction, EvmError> {
        if !msg.tx.is_protected() && !self.evm_keeper.get_params(ctx).allow_unprotected_txs {
            return Err(EvmError::NotSupported(
                "rejected unprotected Ethereum transaction; strictly only EIP-155 signed transactions are allowed"
                    .to_owned(),
            ));
        }
        let verified = msg.tx.clone().verify()?;
        if verified.signer != msg.from {
            return Err(EvmError::InvalidSigner(format!(
                "expected {}, got {}",
                msg.from, verified.signer
            )));
        }
        Ok(verified)
    }

    fn check_chain_id(&self, tx: &VerifiedTransaction) -> Result<(), EvmError> {
        let expected = self.evm_keeper.chain_id();
        match tx.tx.chain_id() {
            Some(chain_id) if chain_id != expected => Err(EvmError::InvalidChainId(format!(
                "expected {expected}, got {chain_id}"
            ))),
            _ => Ok(()),
        }
    }

    /// Checks the nonce against the sender's sequence and increments it. A sender without an account gets one.
    fn check_nonce(&self, ctx: &Context, tx: &VerifiedTransaction) -> Result<(), EvmError> {
        let signer = tx.signer;
        let mut account = match self.accounts.get_account(ctx, signer) {
            Some(account) if account.is_module() => {
                return Err(EvmError::InvalidAccount(format!(
                    "{signer} is a module account"
                )));
            }
            Some(account) => account,
            None => self.accounts.new_account_with_address(ctx, signer),
        };
        if self
            .evm_keeper
            .get_account(ctx, signer)
            .is_some_and(|a| a.is_contract())
        {
            return Err(EvmError::InvalidAccount(format!(
                "the sender is not an EOA: {signer} has code"
            )));
        }
        if tx.tx.nonce() != account.sequence {
            return Err(EvmError::InvalidSequence {
                expected: account.sequence,
                got: tx.tx.nonce(),
            });
        }
        account.sequence += 1;
        self.accounts.set_account(ctx, &account);
        Ok(())
    }

    fn check_min_gas_price(&self, ctx: &Context, effective_gas_price: U256) -> Result<(), EvmError> {
        let min_gas_price = self.evm_keeper.get_min_gas_price(ctx);
        if min_gas_price.is_zero() {
            return Ok(());
        }
        // A price too large to scale is above any minimum.
        let below = Dec::from_int(effective_gas_price).is_some_and(|price| price < min_gas_price);
        if below {
            return Err(EvmError::InvalidGasPrice(format!(
                "effective gas price {effective_gas_price} is below the minimum gas price {min_gas_price}"
            )));
        }
        Ok(())
    }

    /// Deducts `gas_limit × effective_gas_price` from the sender. The fee is converted to the native denom rounding
    /// toward zero.
    fn deduct_fee(
        &self,
        ctx: &Context,
        tx: &VerifiedTransaction,
        base_fee: Option<U256>,
    ) -> Result<Coin, EvmError> {
        if tx.tx.gas_limit() == 0 {
            return Err(EvmError::InvalidGasLimit("gas limit must not be zero".to_owned()));
        }
        let coin_info = self.evm_keeper.coin_info();
        let fee_wei = tx
            .tx
            .fee(base_fee)
            .ok_or_else(|| EvmError::GasOverflow("transaction fee".to_owned()))?;
        let fee = coin_info.native_coin(coin_info.wei_to_native(fee_wei));
        let spendable = coin_info.wei_to_native(self.evm_keeper.spendable_coin(ctx, tx.signer));
        if spendable < fee.amount {
            return Err(EvmError::InsufficientFunds(format!(
                "sender {} has {spendable}{} spendable, fee is {fee}",
                tx.signer, coin_info.base_denom
            )));
        }
        if !fee.is_zero() {
            self.evm_keeper
                .deduct_tx_costs_from_user_balance(ctx, std::slice::from_ref(&fee), tx.signer)?;
        }
        debug!(signer = %tx.signer, %fee, %fee_wei, "deducted fee");
        Ok(fee)
    }

    fn add_gas_wanted(&self, ctx: &Context, tx: &VerifiedTransaction) -> Result<(), EvmError> {
        let gas_limit = tx.tx.gas_limit();
        let total = self.fee_market.add_transient_gas_wanted(ctx, gas_limit)?;
        if let Some(max_gas) = ctx.header().max_gas
            && total > max_gas
        {
            return Err(EvmError::InvalidGasLimit(format!(
                "block gas wanted {total} exceeds the block gas limit {max_gas}"
            )));
        }
        Ok(())
    }
}

/// Returns the single EVM message of `tx`.
fn check_shape(tx: &CosmosTx) -> Result<&MsgEthereumTx, EvmError> {
    let [msg] = tx.msgs.as_slice() else {
        return Err(EvmError::InvalidRequest(format!(
            "expected exactly one message, got {}",
            tx.msgs.len()
        )));
    };
    let Msg::Ethereum(msg) = msg else {
        return Err(EvmError::InvalidRequest(format!(
            "invalid message type {}",
            msg.type_url()
        )));
    };
    if !tx.memo.is_empty() {
        return Err(EvmError::InvalidRequest(
            "memo must be empty for EVM transactions".to_owned(),
        ));
    }
    if tx.timeout_height != 0 {
        return Err(EvmError::InvalidRequest(
            "timeout height must be zero for EVM transactions".to_owned(),
        ));
    }
    let is_ethereum_option = |option: &String| option == EXTENSION_OPTIONS_ETHEREUM_TX;
    if tx.extension_options.len() != 1 || !tx.extension_options.iter().all(is_ethereum_option) {
        return Err(EvmError::UnknownExtensionOptions(format!(
            "expected [{EXTENSION_OPTIONS_ETHEREUM_TX}], got {:?}",
            tx.extension_options
        )));
    }
    if !tx.non_critical_extension_options.is_empty() {
        return Err(EvmError::UnknownExtensionOptions(format!(
            "non-critical extension options are not allowed: {:?}",
            tx.non_critical_extension_options
        )));
    }
    if msg.tx.input().len() > MAX_TX_INPUT_SIZE {
        return Err(EvmError::InvalidRequest(format!(
            "input size {} exceeds the limit of {MAX_TX_INPUT_SIZE}",
            msg.tx.input().len()
        )));
    }
    if msg.from == Address::ZERO {
        return Err(EvmError::ZeroAddress);
    }
    Ok(msg)
}

fn check_base_fee(tx: &VerifiedTransaction, base_fee: Option<U256>) -> Result<(), EvmError> {
    let Some(base_fee) = base_fee else {
        return Ok(());
    };
    let max_fee = tx.tx.max_fee_per_gas();
    if max_fee < base_fee {
        return Err(EvmError::InvalidGasFee(format!(
            "max fee per gas {max_fee} is below the base fee {base_fee}"
        )));
    }
    Ok(())
}
