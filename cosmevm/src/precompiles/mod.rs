//! Stateful precompiles: native code reachable from the EVM at fixed addresses, executing against the host stores.

pub mod abi;
pub mod balance_handler;
pub mod common;
pub mod erc20;
pub mod gas;
pub mod werc20;

use std::{collections::BTreeMap, sync::Arc};

use alloy::primitives::{Address, address};
use anyhow::Result;
use tracing::info;

pub use self::{
    abi::{Method, MethodKind, PrecompileAbi},
    common::{FrameState, Precompile, PrecompileCore, run_precompile},
    erc20::{Erc20Metadata, Erc20Precompile},
    werc20::Werc20Precompile,
};
use crate::{host::GasConfig, keeper::EvmKeeper};

/// The ERC-20 view of the native coin.
pub const NATIVE_ERC20_ADDRESS: Address = address!("0x0000000000000000000000000000000000000802");
/// The wrapped native coin.
pub const WERC20_ADDRESS: Address = address!("0x0000000000000000000000000000000000000803");

/// The precompiles registered with an EVM, keyed by address. Whether a registered precompile may be called is decided
/// separately by [EvmParams::active_static_precompiles](crate::keeper::EvmParams::active_static_precompiles).
#[derive(Clone, Default)]
pub struct PrecompileSet {
    precompiles: BTreeMap<Address, Arc<dyn Precompile>>,
}

impl PrecompileSet {
    pub fn new() -> PrecompileSet {
        PrecompileSet::default()
    }

    /// The native ERC-20 and WERC-20 precompiles at their default addresses.
    pub fn native(
        keeper: Arc<dyn EvmKeeper>,
        metadata: Erc20Metadata,
        kv_gas_config: GasConfig,
    ) -> Result<PrecompileSet> {
        let mut set = PrecompileSet::new();
        set.insert(Arc::new(Erc20Precompile::new(
            NATIVE_ERC20_ADDRESS,
            keeper.clone(),
            metadata.clone(),
            kv_gas_config,
        )?));
        set.insert(Arc::new(Werc20Precompile::new(
            WERC20_ADDRESS,
            keeper,
            metadata,
            kv_gas_config,
        )?));
        Ok(set)
    }

    pub fn insert(&mut self, precompile: Arc<dyn Precompile>) {
        let address = precompile.address();
        info!(%address, "registered precompile");
        self.precompiles.insert(address, precompile);
    }

    pub fn get(&self, address: &Address) -> Option<&dyn Precompile> {
        self.precompiles.get(address).map(|p| p.as_ref())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.precompiles.contains_key(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.precompiles.keys().copied()
    }
}
