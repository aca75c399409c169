use std::{collections::HashSet, fs, path::Path, sync::Arc};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    host::{Context, GasConfig},
    keeper::{EvmKeeper, EvmParams, FeeMarketKeeper, FeeMarketParams},
    precompiles::{Erc20Metadata, PrecompileSet},
    rpc::RpcConfig,
    units::{CoinInfo, EVM_DECIMALS},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub chain: ChainConfig,
    #[serde(default)]
    pub evm: EvmParams,
    #[serde(default)]
    pub fee_market: FeeMarketParams,
    #[serde(default)]
    pub precompile_gas: PrecompileGasConfig,
    #[serde(default)]
    pub erc20: Erc20Metadata,
    #[serde(default)]
    pub rpc: RpcConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    /// The host chain's identifier, e.g. `cosmos_9001-1`.
    #[serde(default = "chain_id_default")]
    pub chain_id: String,
    /// The EIP-155 chain id.
    #[serde(default = "evm_chain_id_default")]
    pub evm_chain_id: u64,
    pub base_denom: String,
    /// Denom of the 18-decimal representation. Defaults to `base_denom`, which is only valid with 18 decimals.
    #[serde(default)]
    pub extended_denom: Option<String>,
    #[serde(default = "decimals_default")]
    pub decimals: u8,
}

pub fn chain_id_default() -> String {
    "cosmos_9001-1".to_owned()
}

pub fn evm_chain_id_default() -> u64 {
    9001
}

pub fn decimals_default() -> u8 {
    EVM_DECIMALS
}

impl ChainConfig {
    pub fn coin_info(&self) -> CoinInfo {
        CoinInfo {
            base_denom: self.base_denom.clone(),
            extended_denom: self
                .extended_denom
                .clone()
                .unwrap_or_else(|| self.base_denom.clone()),
            decimals: self.decimals,
        }
    }
}

/// The KV schedule which prices precompile methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrecompileGasConfig {
    #[serde(default = "GasConfig::kv_default")]
    pub kv: GasConfig,
}

impl Default for PrecompileGasConfig {
    fn default() -> Self {
        PrecompileGasConfig {
            kv: GasConfig::kv_default(),
        }
    }
}

impl Config {
    pub fn from_toml(config: &str) -> Result<Config> {
        Config::merge([("<inline>", config)])
    }

    /// Reads and merges every file in `paths`.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Config> {
        let files = paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                let contents = fs::read_to_string(path)
                    .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
                Ok((path.display().to_string(), contents))
            })
            .collect::<Result<Vec<_>>>()?;
        Config::merge(files.iter().map(|(name, contents)| (name.as_str(), contents.as_str())))
    }

    /// Merges the top-level tables of several TOML documents. A table may only be defined by one document.
    pub fn merge<'a>(sources: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Config> {
        let mut merged_config = toml::Table::new();
        for (name, contents) in sources {
            let config: toml::Table = toml::from_str(contents)?;
            for key in config.keys() {
                if merged_config.contains_key(key) {
                    return Err(anyhow!(
                        "configuration conflict: {name:?} contained a key {key:?} that was already included in an earlier file"
                    ));
                }
            }
            merged_config.extend(config);
        }
        let config: Config = Deserialize::deserialize(merged_config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.chain.coin_info().validate()?;
        if self.chain.evm_chain_id == 0 {
            return Err(anyhow!("evm_chain_id must not be zero"));
        }
        if self.chain.chain_id.is_empty() {
            return Err(anyhow!("chain_id must not be empty"));
        }
        let mut seen = HashSet::new();
        for address in &self.evm.active_static_precompiles {
            if !seen.insert(address) {
                return Err(anyhow!("duplicate active precompile {address}"));
            }
        }
        if self.rpc.scale_exponent > EVM_DECIMALS {
            return Err(anyhow!(
                "rpc.scale_exponent must be at most {EVM_DECIMALS}, got {}",
                self.rpc.scale_exponent
            ));
        }
        if self.erc20.name.is_empty() || self.erc20.symbol.is_empty() {
            return Err(anyhow!("erc20 name and symbol must not be empty"));
        }
        Ok(())
    }

    /// Writes the module params into the genesis state.
    pub fn init_genesis(
        &self,
        ctx: &Context,
        evm_keeper: &dyn EvmKeeper,
        fee_market: &dyn FeeMarketKeeper,
    ) -> Result<()> {
        evm_keeper.set_params(ctx, &self.evm)?;
        fee_market.set_params(ctx, &self.fee_market)?;
        info!(
            chain_id = %self.chain.chain_id,
            evm_chain_id = self.chain.evm_chain_id,
            base_denom = %self.chain.base_denom,
            decimals = self.chain.decimals,
            "initialised genesis params"
        );
        Ok(())
    }

    /// The native ERC-20 and WERC-20 precompiles, priced by `[precompile_gas]`.
    pub fn precompiles(&self, keeper: Arc<dyn EvmKeeper>) -> Result<PrecompileSet> {
        PrecompileSet::native(keeper, self.erc20.clone(), self.precompile_gas.kv)
    }
}
