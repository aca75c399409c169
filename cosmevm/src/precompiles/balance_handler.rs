//! Replays native balance movements made by a precompile onto the EVM state.
//!
//! The handler records the extended balance of every account a call may touch before the body runs, and turns the
//! differences found afterwards into `AddBalance`/`SubBalance` operations, so the EVM's balance map agrees with the
//! bank once the frame settles. Movements the EVM state already reflects, such as a nested frame's own settlement or
//! the call's value transfer, are not replayed.

use std::{collections::BTreeMap, sync::Arc};

use alloy::primitives::{Address, U256};
use tracing::trace;

use crate::{
    error::EvmError,
    evm::VmStateDb,
    host::Context,
    keeper::EvmKeeper,
    tracer::Tracer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operation {
    Sub,
    Add,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChangeEntry {
    pub account: Address,
    /// Amount in wei.
    pub amount: U256,
    pub op: Operation,
}

impl BalanceChangeEntry {
    pub fn new(account: Address, amount: U256, op: Operation) -> BalanceChangeEntry {
        BalanceChangeEntry {
            account,
            amount,
            op,
        }
    }
}

/// Balances of a precompile frame's accounts, captured before its body runs.
pub struct BalanceHandler {
    keeper: Arc<dyn EvmKeeper>,
    /// Native (extended) and EVM-side balance of each account.
    before: BTreeMap<Address, (U256, U256)>,
}

impl BalanceHandler {
    pub fn before(
        ctx: &Context,
        keeper: Arc<dyn EvmKeeper>,
        state_db: &mut dyn VmStateDb,
        accounts: impl IntoIterator<Item = Address>,
    ) -> BalanceHandler {
        let before = accounts
            .into_iter()
            .map(|addr| (addr, (keeper.get_balance(ctx, addr), state_db.get_balance(addr))))
            .collect();
        BalanceHandler { keeper, before }
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Address> {
        self.before.keys()
    }

    /// The native balance changes since [BalanceHandler::before] which the EVM state has not seen yet, in address
    /// order. Movements already applied to the EVM side, such as those settled by a nested precompile frame, are left
    /// out. Fails if the changes create or destroy value.
    pub fn changes(
        &self,
        ctx: &Context,
        state_db: &mut dyn VmStateDb,
    ) -> Result<Vec<BalanceChangeEntry>, EvmError> {
        let mut added = U256::ZERO;
        let mut subtracted = U256::ZERO;
        let mut entries = Vec::new();
        for (&account, &(native_before, evm_before)) in &self.before {
            let native_after = self.keeper.get_balance(ctx, account);
            let evm_after = state_db.get_balance(account);
            // native_after - native_before - (evm_after - evm_before), kept unsigned.
            let overflow = || EvmError::InvalidState(format!("balance of {account} overflows"));
            let gained = native_after.checked_add(evm_before).ok_or_else(overflow)?;
            let lost = native_before.checked_add(evm_after).ok_or_else(overflow)?;
            let entry = match gained.cmp(&lost) {
                std::cmp::Ordering::Equal => continue,
                std::cmp::Ordering::Greater => {
                    let amount = gained - lost;
                    added = added.saturating_add(amount);
                    BalanceChangeEntry::new(account, amount, Operation::Add)
                }
                std::cmp::Ordering::Less => {
                    let amount = lost - gained;
                    subtracted = subtracted.saturating_add(amount);
                    BalanceChangeEntry::new(account, amount, Operation::Sub)
                }
            };
            entries.push(entry);
        }
        if added != subtracted {
            return Err(EvmError::InvalidState(format!(
                "balance changes are not conserved: added {added}, subtracted {subtracted}"
            )));
        }
        Ok(entries)
    }

    /// Applies the balance changes to the EVM state. Subtractions are applied first.
    pub fn settle(
        &self,
        ctx: &Context,
        state_db: &mut dyn VmStateDb,
        tracer: &mut dyn Tracer,
    ) -> Result<Vec<BalanceChangeEntry>, EvmError> {
        let mut changes = self.changes(ctx, state_db)?;
        changes.sort_by_key(|c| c.op);
        for change in &changes {
            trace!(account = %change.account, amount = %change.amount, op = ?change.op, "settling balance");
            match change.op {
                Operation::Sub => state_db.sub_balance(change.account, change.amount)?,
                Operation::Add => state_db.add_balance(change.account, change.amount)?,
            }
            tracer.on_balance_change(change.account, change.amount, change.op == Operation::Add);
        }
        Ok(changes)
    }
}
