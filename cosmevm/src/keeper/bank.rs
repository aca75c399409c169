use alloy::primitives::{Address, U256};
use tracing::trace;

use super::{BankKeeper, BankReader, address_key, decode_amount, encode_amount};
use crate::{
    error::EvmError,
    host::{Context, Event, GasKvStore},
    units::Coin,
};

pub const STORE_PREFIX: &[u8] = b"bank/";

const BALANCE: &[u8] = b"balance/";
const LOCKED: &[u8] = b"locked/";
const SUPPLY: &[u8] = b"supply/";

fn balance_key(prefix: &[u8], addr: Address, denom: &str) -> Vec<u8> {
    let mut key = address_key(prefix, addr);
    key.extend_from_slice(denom.as_bytes());
    key
}

fn supply_key(denom: &str) -> Vec<u8> {
    [SUPPLY, denom.as_bytes()].concat()
}

/// Native balances and supply.
#[derive(Debug, Default, Clone)]
pub struct Keeper;

impl Keeper {
    pub fn new() -> Keeper {
        Keeper
    }

    fn store(&self, ctx: &Context) -> GasKvStore {
        ctx.kv_store(STORE_PREFIX)
    }

    fn read(&self, ctx: &Context, key: &[u8]) -> U256 {
        self.store(ctx)
            .get(key)
            .map(|v| decode_amount(&v))
            .unwrap_or_default()
    }

    fn write(&self, ctx: &Context, key: &[u8], amount: U256) {
        if amount.is_zero() {
            self.store(ctx).delete(key);
        } else {
            self.store(ctx).set(key, encode_amount(amount));
        }
    }

    /// Locks part of an account's balance, so it is no longer spendable (e.g. vesting).
    pub fn set_locked(&self, ctx: &Context, addr: Address, coin: &Coin) {
        self.write(ctx, &balance_key(LOCKED, addr, &coin.denom), coin.amount);
    }

    fn sub_unlocked(&self, ctx: &Context, addr: Address, coin: &Coin) -> Result<(), EvmError> {
        let spendable = self.spendable_coin(ctx, addr, &coin.denom);
        if spendable.amount < coin.amount {
            return Err(EvmError::InsufficientFunds(format!(
                "spendable balance {spendable} is smaller than {coin}"
            )));
        }
        let key = balance_key(BALANCE, addr, &coin.denom);
        let balance = self.read(ctx, &key);
        self.write(ctx, &key, balance - coin.amount);
        Ok(())
    }

    fn add(&self, ctx: &Context, addr: Address, coin: &Coin) -> Result<(), EvmError> {
        let key = balance_key(BALANCE, addr, &coin.denom);
        let balance = self.read(ctx, &key);
        let balance = balance
            .checked_add(coin.amount)
            .ok_or_else(|| EvmError::InvalidAmount(format!("balance overflow adding {coin}")))?;
        self.write(ctx, &key, balance);
        Ok(())
    }

    fn adjust_supply(&self, ctx: &Context, coin: &Coin, increase: bool) -> Result<(), EvmError> {
        let key = supply_key(&coin.denom);
        let supply = self.read(ctx, &key);
        let supply = if increase {
            supply.checked_add(coin.amount)
        } else {
            supply.checked_sub(coin.amount)
        }
        .ok_or_else(|| EvmError::InvalidState(format!("supply of {} out of range", coin.denom)))?;
        self.write(ctx, &key, supply);
        Ok(())
    }
}

impl BankReader for Keeper {
    fn get_balance(&self, ctx: &Context, addr: Address, denom: &str) -> Coin {
        Coin::new(denom, self.read(ctx, &balance_key(BALANCE, addr, denom)))
    }
}

impl BankKeeper for Keeper {
    fn spendable_coin(&self, ctx: &Context, addr: Address, denom: &str) -> Coin {
        let balance = self.read(ctx, &balance_key(BALANCE, addr, denom));
        let locked = self.read(ctx, &balance_key(LOCKED, addr, denom));
        Coin::new(denom, balance.saturating_sub(locked))
    }

    fn send_coins(
        &self,
        ctx: &Context,
        from: Address,
        to: Address,
        coins: &[Coin],
    ) -> Result<(), EvmError> {
        for coin in coins.iter().filter(|c| !c.is_zero()) {
            self.sub_unlocked(ctx, from, coin)?;
            self.add(ctx, to, coin)?;
            trace!(%from, %to, %coin, "sent coins");

            let events = ctx.event_manager();
            events.emit_event(
                Event::new("coin_spent")
                    .with_attribute("spender", from)
                    .with_attribute("amount", coin),
            );
            events.emit_event(
                Event::new("coin_received")
                    .with_attribute("receiver", to)
                    .with_attribute("amount", coin),
            );
            events.emit_event(
                Event::new("transfer")
                    .with_attribute("recipient", to)
                    .with_attribute("sender", from)
                    .with_attribute("amount", coin),
            );
        }
        Ok(())
    }

    fn mint_coins(&self, ctx: &Context, to: Address, coins: &[Coin]) -> Result<(), EvmError> {
        for coin in coins.iter().filter(|c| !c.is_zero()) {
            self.add(ctx, to, coin)?;
            self.adjust_supply(ctx, coin, true)?;
            ctx.event_manager().emit_event(
                Event::new("coinbase")
                    .with_attribute("minter", to)
                    .with_attribute("amount", coin),
            );
        }
        Ok(())
    }

    fn burn_coins(&self, ctx: &Context, from: Address, coins: &[Coin]) -> Result<(), EvmError> {
        for coin in coins.iter().filter(|c| !c.is_zero()) {
            self.sub_unlocked(ctx, from, coin)?;
            self.adjust_supply(ctx, coin, false)?;
            ctx.event_manager().emit_event(
                Event::new("burn")
                    .with_attribute("burner", from)
                    .with_attribute("amount", coin),
            );
        }
        Ok(())
    }

    fn get_supply(&self, ctx: &Context, denom: &str) -> Coin {
        Coin::new(denom, self.read(ctx, &supply_key(denom)))
    }
}
