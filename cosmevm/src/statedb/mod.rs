//! The transaction-scoped EVM state. Accounts are loaded from the [EvmKeeper] on first access and mutated in memory;
//! every mutation is journaled so that call frames can be reverted. Precompile calls join the journal with a host
//! multi-store snapshot, so reverting a frame also unwinds the native side effects of the precompiles it called.

mod config;
mod journal;
mod state_object;

use std::{collections::HashMap, sync::Arc};

use alloy::{
    consensus::constants::KECCAK_EMPTY,
    primitives::{Address, B256, Bytes, Log, U256, keccak256},
};
use tracing::{debug, trace};

pub use self::{
    config::{EvmConfig, TxConfig},
    journal::{Journal, JournalEntry},
    state_object::StateAccount,
};
use self::state_object::StateObject;
use crate::{
    constants::MAX_PRECOMPILE_CALLS,
    error::{EvmError, PrecompileError},
    evm::VmStateDb,
    host::{CacheContext, Context, SnapshotId},
    keeper::EvmKeeper,
};

#[derive(Debug, Clone, Copy)]
struct Revision {
    id: usize,
    journal_index: usize,
}

pub struct StateDb {
    /// Accounts are loaded from here. Writes made by precompiles into the cache context only reach the EVM's view
    /// through balance settlement.
    ctx: Context,
    keeper: Arc<dyn EvmKeeper>,
    tx_config: TxConfig,
    /// Branch of `ctx` which precompiles execute against. Created on first use and written to `ctx` on [StateDb::commit].
    cache_ctx: Option<CacheContext>,
    state_objects: HashMap<Address, StateObject>,
    journal: Journal,
    valid_revisions: Vec<Revision>,
    next_revision_id: usize,
    logs: Vec<Log>,
    refund: u64,
    transient_storage: HashMap<(Address, B256), B256>,
    precompile_calls: usize,
}

impl StateDb {
    pub fn new(ctx: Context, keeper: Arc<dyn EvmKeeper>, tx_config: TxConfig) -> StateDb {
        StateDb {
            ctx,
            keeper,
            tx_config,
            cache_ctx: None,
            state_objects: HashMap::new(),
            journal: Journal::new(),
            valid_revisions: Vec::new(),
            next_revision_id: 0,
            logs: Vec::new(),
            refund: 0,
            transient_storage: HashMap::new(),
            precompile_calls: 0,
        }
    }

    pub fn keeper(&self) -> &Arc<dyn EvmKeeper> {
        &self.keeper
    }

    pub fn tx_config(&self) -> &TxConfig {
        &self.tx_config
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    pub fn precompile_calls(&self) -> usize {
        self.precompile_calls
    }

    /// The cache-branched context of this transaction, created on first use.
    pub fn cache_context(&mut self) -> Context {
        self.cache_ctx
            .get_or_insert_with(|| self.ctx.cache_context())
            .context()
            .clone()
    }

    fn state_object(&mut self, addr: Address) -> Option<&mut StateObject> {
        if !self.state_objects.contains_key(&addr) {
            let account = self.keeper.get_account(&self.ctx, addr)?;
            self.state_objects
                .insert(addr, StateObject::new(addr, account));
        }
        self.state_objects.get_mut(&addr)
    }

    fn get_or_new_state_object(&mut self, addr: Address) -> &mut StateObject {
        if self.state_object(addr).is_none() {
            trace!(%addr, "new state object");
            self.journal
                .append(JournalEntry::CreateObject { account: addr });
        }
        self.state_objects
            .entry(addr)
            .or_insert_with(|| StateObject::new(addr, StateAccount::default()))
    }

    /// Takes a multi-store snapshot of the cache context.
    pub fn multi_store_snapshot(&mut self) -> SnapshotId {
        self.cache_context().multi_store().snapshot()
    }

    /// Restores the cache context to `snapshot` and drops the host events emitted after the first `events_len`.
    pub fn revert_multi_store(
        &mut self,
        snapshot: SnapshotId,
        events_len: usize,
    ) -> Result<(), EvmError> {
        let Some(cache) = &self.cache_ctx else {
            return Err(EvmError::InvalidState(
                "no cache context to revert".to_owned(),
            ));
        };
        cache.context().multi_store().revert_to_snapshot(snapshot)?;
        cache.context().event_manager().truncate(events_len);
        Ok(())
    }

    /// Prepares the host state for a precompile call from this state. The cache context is snapshotted, the call is
    /// journaled with that snapshot and the host events seen so far, and the EVM's pending writes are flushed into the
    /// cache context so the precompile observes them. Returns the cache context the precompile runs against.
    pub fn enter_precompile(&mut self, address: Address) -> Result<Context, PrecompileError> {
        if self.precompile_calls >= MAX_PRECOMPILE_CALLS {
            return Err(PrecompileError::MaxPrecompileCalls);
        }
        let ctx = self.cache_context();
        let snapshot = ctx.multi_store().snapshot();
        let events_len = ctx.event_manager().len();
        self.journal.append(JournalEntry::PrecompileCall {
            address,
            snapshot,
            events_len,
        });
        self.precompile_calls += 1;
        self.commit_with_cache_ctx()?;
        debug!(%address, snapshot = snapshot.index(), events_len, "entered precompile");
        Ok(ctx)
    }

    /// Writes every dirty account into the cache context. Objects stay loaded and dirty, so a later flush or
    /// [StateDb::commit] writes them again.
    pub fn commit_with_cache_ctx(&mut self) -> Result<(), EvmError> {
        let ctx = self.cache_context();
        for addr in self.journal.dirty_accounts() {
            let Some(obj) = self.state_objects.get(&addr) else {
                continue;
            };
            if obj.dirty_code {
                let code = obj.code.clone().unwrap_or_default();
                self.keeper.set_code(&ctx, obj.account.code_hash, &code);
            }
            for (key, value) in &obj.dirty_storage {
                self.keeper.set_state(&ctx, addr, *key, *value);
            }
            self.keeper.set_account(&ctx, addr, &obj.account)?;
        }
        Ok(())
    }

    /// Flushes all pending writes and writes the cache context to the transaction context.
    pub fn commit(&mut self) -> Result<(), EvmError> {
        self.commit_with_cache_ctx()?;
        if let Some(cache) = self.cache_ctx.take() {
            cache.write();
        }
        Ok(())
    }

    fn undo(&mut self, entry: JournalEntry) -> Result<(), EvmError> {
        match entry {
            JournalEntry::CreateObject { account } => {
                self.state_objects.remove(&account);
            }
            JournalEntry::BalanceChange { account, prev } => {
                if let Some(obj) = self.state_objects.get_mut(&account) {
                    obj.account.balance = prev;
                }
            }
            JournalEntry::NonceChange { account, prev } => {
                if let Some(obj) = self.state_objects.get_mut(&account) {
                    obj.account.nonce = prev;
                }
            }
            JournalEntry::StorageChange { account, key, prev } => {
                if let Some(obj) = self.state_objects.get_mut(&account) {
                    obj.dirty_storage.insert(key, prev);
                }
            }
            JournalEntry::CodeChange {
                account,
                prev_code,
                prev_hash,
                prev_dirty,
            } => {
                if let Some(obj) = self.state_objects.get_mut(&account) {
                    obj.code = Some(prev_code);
                    obj.account.code_hash = prev_hash;
                    obj.dirty_code = prev_dirty;
                }
            }
            JournalEntry::TransientStorageChange { account, key, prev } => {
                self.write_transient(account, key, prev);
            }
            JournalEntry::RefundChange { prev } => self.refund = prev,
            JournalEntry::AddLog => {
                self.logs.pop();
            }
            JournalEntry::PrecompileCall {
                address,
                snapshot,
                events_len,
            } => {
                debug!(%address, snapshot = snapshot.index(), "reverting precompile call");
                self.revert_multi_store(snapshot, events_len)?;
            }
        }
        Ok(())
    }

    fn write_transient(&mut self, addr: Address, key: B256, value: B256) {
        if value.is_zero() {
            self.transient_storage.remove(&(addr, key));
        } else {
            self.transient_storage.insert((addr, key), value);
        }
    }
}

impl VmStateDb for StateDb {
    fn exist(&mut self, addr: Address) -> bool {
        self.state_object(addr).is_some()
    }

    fn empty(&mut self, addr: Address) -> bool {
        self.state_object(addr).is_none_or(|obj| obj.is_empty())
    }

    fn get_balance(&mut self, addr: Address) -> U256 {
        self.state_object(addr)
            .map(|obj| obj.account.balance)
            .unwrap_or_default()
    }

    fn add_balance(&mut self, addr: Address, amount: U256) -> Result<(), EvmError> {
        let obj = self.get_or_new_state_object(addr);
        let prev = obj.account.balance;
        let balance = prev
            .checked_add(amount)
            .ok_or_else(|| EvmError::InvalidAmount(format!("balance of {addr} overflows")))?;
        obj.account.balance = balance;
        self.journal.append(JournalEntry::BalanceChange {
            account: addr,
            prev,
        });
        Ok(())
    }

    fn sub_balance(&mut self, addr: Address, amount: U256) -> Result<(), EvmError> {
        let obj = self.get_or_new_state_object(addr);
        let prev = obj.account.balance;
        let balance = prev.checked_sub(amount).ok_or_else(|| {
            EvmError::InsufficientFunds(format!("balance of {addr} is {prev}, need {amount}"))
        })?;
        obj.account.balance = balance;
        self.journal.append(JournalEntry::BalanceChange {
            account: addr,
            prev,
        });
        Ok(())
    }

    fn get_nonce(&mut self, addr: Address) -> u64 {
        self.state_object(addr)
            .map(|obj| obj.account.nonce)
            .unwrap_or_default()
    }

    fn set_nonce(&mut self, addr: Address, nonce: u64) {
        let obj = self.get_or_new_state_object(addr);
        let prev = obj.account.nonce;
        obj.account.nonce = nonce;
        self.journal.append(JournalEntry::NonceChange {
            account: addr,
            prev,
        });
    }

    fn get_code_hash(&mut self, addr: Address) -> B256 {
        self.state_object(addr)
            .map(|obj| obj.account.code_hash)
            .unwrap_or_default()
    }

    fn get_code(&mut self, addr: Address) -> Bytes {
        let ctx = self.ctx.clone();
        let keeper = self.keeper.clone();
        let Some(obj) = self.state_object(addr) else {
            return Bytes::new();
        };
        if let Some(code) = &obj.code {
            return code.clone();
        }
        let code = keeper.get_code(&ctx, obj.account.code_hash);
        obj.code = Some(code.clone());
        code
    }

    fn set_code(&mut self, addr: Address, code: Bytes) {
        let prev_code = self.get_code(addr);
        let obj = self.get_or_new_state_object(addr);
        let prev_hash = obj.account.code_hash;
        let prev_dirty = obj.dirty_code;
        obj.account.code_hash = if code.is_empty() {
            KECCAK_EMPTY
        } else {
            keccak256(&code)
        };
        obj.code = Some(code);
        obj.dirty_code = true;
        self.journal.append(JournalEntry::CodeChange {
            account: addr,
            prev_code,
            prev_hash,
            prev_dirty,
        });
    }

    fn get_committed_state(&mut self, addr: Address, key: B256) -> B256 {
        let ctx = self.ctx.clone();
        let keeper = self.keeper.clone();
        let Some(obj) = self.state_object(addr) else {
            return B256::ZERO;
        };
        *obj.origin_storage
            .entry(key)
            .or_insert_with(|| keeper.get_state(&ctx, addr, key))
    }

    fn get_state(&mut self, addr: Address, key: B256) -> B256 {
        if let Some(value) = self
            .state_objects
            .get(&addr)
            .and_then(|obj| obj.dirty_storage.get(&key))
        {
            return *value;
        }
        self.get_committed_state(addr, key)
    }

    fn set_state(&mut self, addr: Address, key: B256, value: B256) {
        let prev = self.get_state(addr, key);
        let obj = self.get_or_new_state_object(addr);
        obj.dirty_storage.insert(key, value);
        self.journal.append(JournalEntry::StorageChange {
            account: addr,
            key,
            prev,
        });
    }

    fn get_transient_state(&self, addr: Address, key: B256) -> B256 {
        self.transient_storage
            .get(&(addr, key))
            .copied()
            .unwrap_or_default()
    }

    fn set_transient_state(&mut self, addr: Address, key: B256, value: B256) {
        let prev = self.get_transient_state(addr, key);
        if prev == value {
            return;
        }
        self.journal.append(JournalEntry::TransientStorageChange {
            account: addr,
            key,
            prev,
        });
        self.write_transient(addr, key, value);
    }

    fn get_refund(&self) -> u64 {
        self.refund
    }

    fn add_refund(&mut self, gas: u64) {
        self.journal
            .append(JournalEntry::RefundChange { prev: self.refund });
        self.refund = self.refund.saturating_add(gas);
    }

    fn sub_refund(&mut self, gas: u64) -> Result<(), EvmError> {
        let refund = self.refund.checked_sub(gas).ok_or_else(|| {
            EvmError::GasOverflow(format!("refund counter below zero ({gas} > {})", self.refund))
        })?;
        self.journal
            .append(JournalEntry::RefundChange { prev: self.refund });
        self.refund = refund;
        Ok(())
    }

    fn add_log(&mut self, log: Log) {
        self.journal.append(JournalEntry::AddLog);
        self.logs.push(log);
    }

    fn snapshot(&mut self) -> usize {
        let id = self.next_revision_id;
        self.next_revision_id += 1;
        self.valid_revisions.push(Revision {
            id,
            journal_index: self.journal.len(),
        });
        id
    }

    fn revert_to_snapshot(&mut self, id: usize) -> Result<(), EvmError> {
        let Ok(index) = self.valid_revisions.binary_search_by_key(&id, |r| r.id) else {
            return Err(EvmError::InvalidState(format!(
                "revision id {id} cannot be reverted"
            )));
        };
        let journal_index = self.valid_revisions[index].journal_index;
        while let Some(entry) = self.journal.pop_above(journal_index) {
            self.undo(entry)?;
        }
        self.valid_revisions.truncate(index);
        Ok(())
    }

    fn as_chain_state(&mut self) -> Option<&mut StateDb> {
        Some(self)
    }
}
