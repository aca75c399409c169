use std::collections::HashMap;

use alloy::primitives::{Address, B256, Bytes, U256};

use crate::host::SnapshotId;

/// An undo record. Entries are reverted in reverse order of insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    CreateObject {
        account: Address,
    },
    BalanceChange {
        account: Address,
        prev: U256,
    },
    NonceChange {
        account: Address,
        prev: u64,
    },
    StorageChange {
        account: Address,
        key: B256,
        prev: B256,
    },
    CodeChange {
        account: Address,
        prev_code: Bytes,
        prev_hash: B256,
        prev_dirty: bool,
    },
    TransientStorageChange {
        account: Address,
        key: B256,
        prev: B256,
    },
    RefundChange {
        prev: u64,
    },
    AddLog,
    /// A call into a precompile. Reverting it restores the host multi-store to `snapshot` and drops every host event
    /// after the first `events_len`.
    PrecompileCall {
        address: Address,
        snapshot: SnapshotId,
        events_len: usize,
    },
}

impl JournalEntry {
    /// The account this entry dirties, if any.
    pub fn dirtied(&self) -> Option<Address> {
        match self {
            JournalEntry::CreateObject { account }
            | JournalEntry::BalanceChange { account, .. }
            | JournalEntry::NonceChange { account, .. }
            | JournalEntry::StorageChange { account, .. }
            | JournalEntry::CodeChange { account, .. } => Some(*account),
            JournalEntry::TransientStorageChange { .. }
            | JournalEntry::RefundChange { .. }
            | JournalEntry::AddLog
            | JournalEntry::PrecompileCall { .. } => None,
        }
    }
}

/// The ordered list of undo records for one transaction, plus how many of them touch each account.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
    dirties: HashMap<Address, usize>,
}

impl Journal {
    pub fn new() -> Journal {
        Journal::default()
    }

    pub fn append(&mut self, entry: JournalEntry) {
        if let Some(account) = entry.dirtied() {
            *self.dirties.entry(account).or_default() += 1;
        }
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes the most recent entry if there are more than `len`.
    pub(crate) fn pop_above(&mut self, len: usize) -> Option<JournalEntry> {
        if self.entries.len() <= len {
            return None;
        }
        let entry = self.entries.pop()?;
        if let Some(account) = entry.dirtied() {
            if let Some(count) = self.dirties.get_mut(&account) {
                *count -= 1;
                if *count == 0 {
                    self.dirties.remove(&account);
                }
            }
        }
        Some(entry)
    }

    /// Accounts with at least one live entry, in address order.
    pub fn dirty_accounts(&self) -> Vec<Address> {
        let mut accounts: Vec<_> = self.dirties.keys().copied().collect();
        accounts.sort();
        accounts
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }
}
