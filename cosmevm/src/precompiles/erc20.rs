use std::sync::Arc;

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes, Log, U256},
    sol,
    sol_types::SolEvent,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    abi::{Method, PrecompileAbi, address_arg, uint_arg},
    common::{Precompile, PrecompileCore},
};
use crate::{
    error::{EvmError, PrecompileError},
    evm::{Contract, Evm},
    host::{Context, GasConfig},
    keeper::EvmKeeper,
    units::EVM_DECIMALS,
};

pub(crate) const IERC20_ABI: &str = include_str!("interfaces/IERC20.json");

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Display metadata of the native coin's ERC-20 view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Erc20Metadata {
    pub name: String,
    pub symbol: String,
}

impl Default for Erc20Metadata {
    fn default() -> Self {
        Erc20Metadata {
            name: "Native Coin".to_owned(),
            symbol: "NATIVE".to_owned(),
        }
    }
}

/// The native coin as an ERC-20 token. Balances are extended balances, in 18 decimals.
pub struct Erc20Precompile {
    core: PrecompileCore,
    keeper: Arc<dyn EvmKeeper>,
    metadata: Erc20Metadata,
}

impl Erc20Precompile {
    pub fn new(
        address: Address,
        keeper: Arc<dyn EvmKeeper>,
        metadata: Erc20Metadata,
        kv_gas_config: GasConfig,
    ) -> Result<Erc20Precompile> {
        Erc20Precompile::with_abi(address, IERC20_ABI, keeper, metadata, kv_gas_config)
    }

    /// Builds the precompile over an ABI which extends `IERC20`.
    pub(crate) fn with_abi(
        address: Address,
        abi: &str,
        keeper: Arc<dyn EvmKeeper>,
        metadata: Erc20Metadata,
        kv_gas_config: GasConfig,
    ) -> Result<Erc20Precompile> {
        let abi = PrecompileAbi::from_json(abi)?;
        info!(%address, symbol = %metadata.symbol, "created ERC-20 precompile");
        Ok(Erc20Precompile {
            core: PrecompileCore {
                address,
                abi,
                kv_gas_config,
            },
            keeper,
            metadata,
        })
    }

    pub fn keeper(&self) -> &Arc<dyn EvmKeeper> {
        &self.keeper
    }

    fn transfer(
        &self,
        ctx: &Context,
        evm: &mut Evm<'_>,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), PrecompileError> {
        debug!(%from, %to, %amount, "ERC-20 transfer");
        self.keeper
            .send_extended(ctx, from, to, amount)
            .map_err(|e| match e {
                EvmError::InsufficientFunds(_) => {
                    PrecompileError::revert("ERC20: transfer amount exceeds balance")
                }
                e => e.into(),
            })?;
        evm.state_db().add_log(Log {
            address: self.core.address,
            data: Transfer {
                from,
                to,
                value: amount,
            }
            .encode_log_data(),
        });
        Ok(())
    }
}

impl Precompile for Erc20Precompile {
    fn core(&self) -> &PrecompileCore {
        &self.core
    }

    fn execute(
        &self,
        ctx: &Context,
        evm: &mut Evm<'_>,
        contract: &Contract,
        method: &Method,
        args: &[DynSolValue],
    ) -> Result<Bytes, PrecompileError> {
        let output = match method.name.as_str() {
            "name" => DynSolValue::String(self.metadata.name.clone()),
            "symbol" => DynSolValue::String(self.metadata.symbol.clone()),
            "decimals" => DynSolValue::Uint(U256::from(EVM_DECIMALS), 8),
            "balanceOf" => {
                let account = address_arg(args, 0)?;
                DynSolValue::Uint(self.keeper.get_balance(ctx, account), 256)
            }
            "transfer" => {
                let to = address_arg(args, 0)?;
                let amount = uint_arg(args, 1)?;
                self.transfer(ctx, evm, contract.caller, to, amount)?;
                DynSolValue::Bool(true)
            }
            other => {
                return Err(PrecompileError::revert(format!("unknown method: {other}")));
            }
        };
        Ok(self.core.abi.pack_outputs(method, &[output])?)
    }
}
