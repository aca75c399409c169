use std::sync::Arc;

use alloy::primitives::{Address, B256};

use super::{
    events::EventManager,
    meter::{Gas, GasConfig, GasMeter, InfiniteGasMeter},
    store::{MultiStore, Store, Value},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub chain_id: String,
    pub height: u64,
    /// Unix time in seconds.
    pub time: u64,
    pub hash: B256,
    pub proposer: Address,
    /// Consensus limit on the gas wanted by a block's transactions. `None` is unlimited.
    pub max_gas: Option<Gas>,
}

/// Everything a keeper needs to execute against the chain: the store, the block, and the gas and event sinks. Cloning
/// is cheap and clones share the store, meter and event manager.
#[derive(Debug, Clone)]
pub struct Context {
    multi_store: MultiStore,
    header: BlockHeader,
    gas_meter: Arc<dyn GasMeter>,
    event_manager: EventManager,
    kv_gas_config: GasConfig,
    transient_kv_gas_config: GasConfig,
    is_check_tx: bool,
}

impl Context {
    pub fn new(multi_store: MultiStore, header: BlockHeader) -> Context {
        Context {
            multi_store,
            header,
            gas_meter: Arc::new(InfiniteGasMeter::new()),
            event_manager: EventManager::new(),
            kv_gas_config: GasConfig::kv_default(),
            transient_kv_gas_config: GasConfig::transient_default(),
            is_check_tx: false,
        }
    }

    pub fn multi_store(&self) -> &MultiStore {
        &self.multi_store
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn block_height(&self) -> u64 {
        self.header.height
    }

    pub fn block_time(&self) -> u64 {
        self.header.time
    }

    pub fn chain_id(&self) -> &str {
        &self.header.chain_id
    }

    pub fn gas_meter(&self) -> &Arc<dyn GasMeter> {
        &self.gas_meter
    }

    pub fn event_manager(&self) -> &EventManager {
        &self.event_manager
    }

    pub fn kv_gas_config(&self) -> GasConfig {
        self.kv_gas_config
    }

    pub fn transient_kv_gas_config(&self) -> GasConfig {
        self.transient_kv_gas_config
    }

    pub fn is_check_tx(&self) -> bool {
        self.is_check_tx
    }

    pub fn with_multi_store(&self, multi_store: MultiStore) -> Context {
        Context {
            multi_store,
            ..self.clone()
        }
    }

    pub fn with_header(&self, header: BlockHeader) -> Context {
        Context {
            header,
            ..self.clone()
        }
    }

    pub fn with_gas_meter(&self, gas_meter: Arc<dyn GasMeter>) -> Context {
        Context {
            gas_meter,
            ..self.clone()
        }
    }

    pub fn with_event_manager(&self, event_manager: EventManager) -> Context {
        Context {
            event_manager,
            ..self.clone()
        }
    }

    pub fn with_kv_gas_config(&self, kv_gas_config: GasConfig) -> Context {
        Context {
            kv_gas_config,
            ..self.clone()
        }
    }

    pub fn with_transient_kv_gas_config(&self, transient_kv_gas_config: GasConfig) -> Context {
        Context {
            transient_kv_gas_config,
            ..self.clone()
        }
    }

    pub fn with_is_check_tx(&self, is_check_tx: bool) -> Context {
        Context {
            is_check_tx,
            ..self.clone()
        }
    }

    /// Branches the multi-store and starts a fresh event manager. Nothing is visible to this context until
    /// [CacheContext::write] is called.
    pub fn cache_context(&self) -> CacheContext {
        CacheContext {
            ctx: self
                .with_multi_store(self.multi_store.branch())
                .with_event_manager(EventManager::new()),
            parent_events: self.event_manager.clone(),
        }
    }

    /// A gas-metered view of the persistent store under `prefix`.
    pub fn kv_store(&self, prefix: &[u8]) -> GasKvStore {
        GasKvStore {
            store: self.multi_store.kv().clone(),
            prefix: prefix.to_vec(),
            meter: self.gas_meter.clone(),
            config: self.kv_gas_config,
        }
    }

    /// A gas-metered view of the transient store under `prefix`.
    pub fn transient_store(&self, prefix: &[u8]) -> GasKvStore {
        GasKvStore {
            store: self.multi_store.transient().clone(),
            prefix: prefix.to_vec(),
            meter: self.gas_meter.clone(),
            config: self.transient_kv_gas_config,
        }
    }
}

/// A branch of a [Context] together with the means to commit it.
#[derive(Debug, Clone)]
pub struct CacheContext {
    ctx: Context,
    parent_events: EventManager,
}

impl CacheContext {
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Flushes the branched stores into the parent and forwards the events emitted so far.
    pub fn write(&self) {
        self.ctx.multi_store.write();
        self.parent_events
            .emit_events(self.ctx.event_manager.events());
        self.ctx.event_manager.truncate(0);
    }
}

/// A prefixed store view which charges the context's gas meter for every access.
#[derive(Debug, Clone)]
pub struct GasKvStore {
    store: Store,
    prefix: Vec<u8>,
    meter: Arc<dyn GasMeter>,
    config: GasConfig,
}

impl GasKvStore {
    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }

    fn charge_per_byte(&self, per_byte: Gas, len: usize, descriptor: &str) {
        self.meter
            .consume_gas(per_byte.saturating_mul(len as Gas), descriptor);
    }

    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.meter.consume_gas(self.config.read_flat, "ReadFlat");
        let value = self.store.get(&self.full_key(key));
        let len = key.len() + value.as_ref().map_or(0, Vec::len);
        self.charge_per_byte(self.config.read_per_byte, len, "ReadPerByte");
        value
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.meter.consume_gas(self.config.has, "Has");
        self.store.has(&self.full_key(key))
    }

    pub fn set(&self, key: &[u8], value: Value) {
        self.meter.consume_gas(self.config.write_flat, "WriteFlat");
        self.charge_per_byte(
            self.config.write_per_byte,
            key.len() + value.len(),
            "WritePerByte",
        );
        self.store.set(&self.full_key(key), value);
    }

    pub fn delete(&self, key: &[u8]) {
        self.meter.consume_gas(self.config.delete, "Delete");
        self.store.delete(&self.full_key(key));
    }

    /// Entries under `prefix` (relative to this view), with the view's prefix stripped from the keys.
    pub fn iter_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Value)> {
        let entries = self.store.iter_prefix(&self.full_key(prefix));
        entries
            .into_iter()
            .map(|(key, value)| {
                self.meter.consume_gas(self.config.iter_next_flat, "IterNextFlat");
                self.charge_per_byte(
                    self.config.read_per_byte,
                    key.len() + value.len(),
                    "ValuePerByte",
                );
                (key[self.prefix.len()..].to_vec(), value)
            })
            .collect()
    }
}
