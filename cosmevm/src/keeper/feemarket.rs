use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{FeeMarketKeeper, decode, encode};
use crate::{error::EvmError, host::Context, units::Dec};

pub const STORE_PREFIX: &[u8] = b"feemarket/";

const PARAMS: &[u8] = b"params";
const GAS_WANTED: &[u8] = b"gas_wanted";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeeMarketParams {
    /// Disables the base fee entirely.
    #[serde(default)]
    pub no_base_fee: bool,
    /// Base fee in native units per gas.
    #[serde(default = "base_fee_default")]
    pub base_fee: Dec,
    /// Global minimum gas price in native units per gas.
    #[serde(default)]
    pub min_gas_price: Dec,
    /// Height from which the base fee applies.
    #[serde(default)]
    pub enable_height: u64,
}

pub fn base_fee_default() -> Dec {
    // 1 gwei at 18 decimals.
    Dec::from_u64(1_000_000_000)
}

impl Default for FeeMarketParams {
    fn default() -> Self {
        FeeMarketParams {
            no_base_fee: false,
            base_fee: base_fee_default(),
            min_gas_price: Dec::ZERO,
            enable_height: 0,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Keeper;

impl Keeper {
    pub fn new() -> Keeper {
        Keeper
    }
}

impl FeeMarketKeeper for Keeper {
    fn get_params(&self, ctx: &Context) -> FeeMarketParams {
        let Some(bytes) = ctx.kv_store(STORE_PREFIX).get(PARAMS) else {
            return FeeMarketParams::default();
        };
        decode(&bytes).unwrap_or_else(|e| {
            warn!(%e, "invalid fee market params, using defaults");
            FeeMarketParams::default()
        })
    }

    fn set_params(&self, ctx: &Context, params: &FeeMarketParams) -> Result<(), EvmError> {
        ctx.kv_store(STORE_PREFIX).set(PARAMS, encode(params)?);
        Ok(())
    }

    fn get_base_fee(&self, ctx: &Context) -> Dec {
        self.get_params(ctx).base_fee
    }

    fn get_base_fee_enabled(&self, ctx: &Context) -> bool {
        let params = self.get_params(ctx);
        !params.no_base_fee && ctx.block_height() >= params.enable_height
    }

    fn add_transient_gas_wanted(&self, ctx: &Context, gas: u64) -> Result<u64, EvmError> {
        let total = self
            .get_transient_gas_wanted(ctx)
            .checked_add(gas)
            .ok_or_else(|| EvmError::GasOverflow("block gas wanted".to_owned()))?;
        ctx.transient_store(STORE_PREFIX)
            .set(GAS_WANTED, total.to_be_bytes().to_vec());
        Ok(total)
    }

    fn get_transient_gas_wanted(&self, ctx: &Context) -> u64 {
        ctx.transient_store(STORE_PREFIX)
            .get(GAS_WANTED)
            .and_then(|b| <[u8; 8]>::try_from(b.as_slice()).ok())
            .map(u64::from_be_bytes)
            .unwrap_or_default()
    }
}
