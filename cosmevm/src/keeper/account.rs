use alloy::primitives::{Address, keccak256};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{AccountKeeper, address_key, decode, encode};
use crate::{
    error::EvmError,
    host::{Context, GasKvStore},
};

pub const STORE_PREFIX: &[u8] = b"acc/";

const ACCOUNT: &[u8] = b"account/";
const NEXT_ACCOUNT_NUMBER: &[u8] = b"next_number";

/// Module account which collects transaction fees.
pub const FEE_COLLECTOR: &str = "fee_collector";

/// The deterministic address of a module account.
pub fn module_address(name: &str) -> Address {
    Address::from_slice(&keccak256(format!("module/{name}"))[12..])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountKind {
    Base,
    Module { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub account_number: u64,
    pub sequence: u64,
    pub kind: AccountKind,
}

impl Account {
    pub fn is_module(&self) -> bool {
        matches!(self.kind, AccountKind::Module { .. })
    }
}

#[derive(Debug, Default, Clone)]
pub struct Keeper;

impl Keeper {
    pub fn new() -> Keeper {
        Keeper
    }

    fn store(&self, ctx: &Context) -> GasKvStore {
        ctx.kv_store(STORE_PREFIX)
    }

    /// Creates and stores the module account `name` if it does not exist yet.
    pub fn ensure_module_account(&self, ctx: &Context, name: &str) -> Account {
        let addr = module_address(name);
        if let Some(account) = self.get_account(ctx, addr) {
            return account;
        }
        let account = Account {
            kind: AccountKind::Module {
                name: name.to_owned(),
            },
            ..self.new_account_with_address(ctx, addr)
        };
        self.set_account(ctx, &account);
        account
    }
}

impl AccountKeeper for Keeper {
    fn get_account(&self, ctx: &Context, addr: Address) -> Option<Account> {
        let bytes = self.store(ctx).get(&address_key(ACCOUNT, addr))?;
        match decode(&bytes) {
            Ok(account) => Some(account),
            Err(e) => {
                warn!(%addr, %e, "undecodable account record");
                None
            }
        }
    }

    fn new_account_with_address(&self, ctx: &Context, addr: Address) -> Account {
        let store = self.store(ctx);
        let number = store
            .get(NEXT_ACCOUNT_NUMBER)
            .and_then(|b| <[u8; 8]>::try_from(b.as_slice()).ok())
            .map(u64::from_be_bytes)
            .unwrap_or_default();
        store.set(NEXT_ACCOUNT_NUMBER, (number + 1).to_be_bytes().to_vec());
        Account {
            address: addr,
            account_number: number,
            sequence: 0,
            kind: AccountKind::Base,
        }
    }

    fn set_account(&self, ctx: &Context, account: &Account) {
        match encode(account) {
            Ok(bytes) => self
                .store(ctx)
                .set(&address_key(ACCOUNT, account.address), bytes),
            Err(e) => warn!(address = %account.address, %e, "failed to store account"),
        }
    }

    fn remove_account(&self, ctx: &Context, addr: Address) {
        self.store(ctx).delete(&address_key(ACCOUNT, addr));
    }

    fn get_sequence(&self, ctx: &Context, addr: Address) -> Result<u64, EvmError> {
        self.get_account(ctx, addr)
            .map(|a| a.sequence)
            .ok_or_else(|| EvmError::InvalidAccount(format!("account {addr} does not exist")))
    }
}
