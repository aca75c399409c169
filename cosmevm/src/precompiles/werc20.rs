//! The wrapped native coin. The native coin already is the token, so wrapping only moves value between the caller and
//! the precompile and emits the WETH9 events.

use std::sync::Arc;

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes, Log, U256},
    sol,
    sol_types::SolEvent,
};
use anyhow::Result;
use tracing::debug;

use super::{
    abi::{Method, MethodKind, uint_arg},
    common::{Precompile, PrecompileCore},
    erc20::{Erc20Metadata, Erc20Precompile},
};
use crate::{
    error::PrecompileError,
    evm::{Contract, Evm},
    host::{Context, Gas, GasConfig},
    keeper::EvmKeeper,
};

pub(crate) const IWERC20_ABI: &str = include_str!("interfaces/IWERC20.json");

pub const DEPOSIT_REQUIRED_GAS: Gas = 23_273;
pub const WITHDRAW_REQUIRED_GAS: Gas = 9_207;

sol! {
    event Deposit(address indexed dst, uint256 wad);
    event Withdrawal(address indexed src, uint256 wad);
}

pub struct Werc20Precompile {
    erc20: Erc20Precompile,
}

impl Werc20Precompile {
    pub fn new(
        address: Address,
        keeper: Arc<dyn EvmKeeper>,
        metadata: Erc20Metadata,
        kv_gas_config: GasConfig,
    ) -> Result<Werc20Precompile> {
        Ok(Werc20Precompile {
            erc20: Erc20Precompile::with_abi(address, IWERC20_ABI, keeper, metadata, kv_gas_config)?,
        })
    }

    fn is_deposit(method: &Method) -> bool {
        matches!(method.kind, MethodKind::Fallback | MethodKind::Receive) || method.name == "deposit"
    }

    /// Moves the value sent with the call, which the EVM has already credited to the precompile, back to the caller.
    fn deposit(&self, ctx: &Context, evm: &mut Evm<'_>, contract: &Contract) -> Result<(), PrecompileError> {
        let (address, caller, value) = (self.address(), contract.caller, contract.value);
        debug!(%caller, %value, "deposit");
        if !value.is_zero() {
            self.erc20
                .keeper()
                .send_extended(ctx, address, caller, value)?;
        }
        evm.state_db().add_log(Log {
            address,
            data: Deposit {
                dst: caller,
                wad: value,
            }
            .encode_log_data(),
        });
        Ok(())
    }

    fn withdraw(
        &self,
        ctx: &Context,
        evm: &mut Evm<'_>,
        contract: &Contract,
        wad: U256,
    ) -> Result<(), PrecompileError> {
        let keeper = self.erc20.keeper();
        let coin_info = keeper.coin_info();
        let spendable = keeper.spendable_coin(ctx, contract.caller);
        // Only whole native units can be withdrawn.
        let native = coin_info.wei_to_native(spendable);
        let available = native.saturating_mul(coin_info.conversion_factor());
        if available < wad {
            return Err(PrecompileError::revert(format!(
                "account balance {available} is lower than withdraw balance {wad}"
            )));
        }
        debug!(caller = %contract.caller, %wad, "withdraw");
        evm.state_db().add_log(Log {
            address: self.address(),
            data: Withdrawal {
                src: contract.caller,
                wad,
            }
            .encode_log_data(),
        });
        Ok(())
    }
}

impl Precompile for Werc20Precompile {
    fn core(&self) -> &PrecompileCore {
        self.erc20.core()
    }

    fn required_gas(&self, input: &[u8]) -> Gas {
        let Some(selector) = input.get(..4) else {
            return DEPOSIT_REQUIRED_GAS;
        };
        let core = self.core();
        let Ok(method) = core.abi.method_by_selector(selector) else {
            return 0;
        };
        match method.name.as_str() {
            "deposit" => DEPOSIT_REQUIRED_GAS,
            "withdraw" => WITHDRAW_REQUIRED_GAS,
            _ => self.erc20.required_gas(input),
        }
    }

    fn execute(
        &self,
        ctx: &Context,
        evm: &mut Evm<'_>,
        contract: &Contract,
        method: &Method,
        args: &[DynSolValue],
    ) -> Result<Bytes, PrecompileError> {
        if Werc20Precompile::is_deposit(method) {
            self.deposit(ctx, evm, contract)?;
            return Ok(Bytes::new());
        }
        if method.name == "withdraw" {
            self.withdraw(ctx, evm, contract, uint_arg(args, 0)?)?;
            return Ok(Bytes::new());
        }
        self.erc20.execute(ctx, evm, contract, method, args)
    }
}
