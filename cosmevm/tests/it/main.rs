mod ante;
mod config;
mod journal;
mod rpc;

use std::sync::Arc;

use alloy::{
    consensus::TxEip1559,
    dyn_abi::DynSolValue,
    primitives::{Address, B256, Bytes, Log, TxKind, U256, address},
    sol,
    sol_types::SolCall,
};
use cosmevm::{
    ante::build_evm_execution_ctx,
    error::PrecompileError,
    evm::{CallOutcome, Contract, Evm},
    exec::Executor,
    host::{BlockHeader, Context, Event, GasConfig, MultiStore},
    keeper::{
        AccountKeeper, BankReader, EvmKeeper, EvmParams, FeeMarketKeeper, FeeMarketParams, account,
        bank, evm, feemarket,
    },
    precompiles::{
        Erc20Metadata, Method, NATIVE_ERC20_ADDRESS, Precompile, PrecompileAbi, PrecompileCore,
        PrecompileSet, abi::uint_arg, common::cross_call,
    },
    rpc::CommittedContexts,
    statedb::{StateDb, TxConfig},
    transaction::{CosmosTx, Transaction, public_key_to_address},
    units::CoinInfo,
};
use k256::ecdsa::SigningKey;

sol! {
    interface IERC20 {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function balanceOf(address account) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
    }

    interface IWERC20 {
        function deposit() external payable;
        function withdraw(uint256 wad) external;
    }

    interface IRelay {
        function heavy(uint256 amount) external;
        function forward(address to, uint256 amount) external;
        function forwardThenRevert(address to, uint256 amount) external;
    }
}

pub const EVM_CHAIN_ID: u64 = 9001;
pub const BLOCK_GAS_LIMIT: u64 = 30_000_000;

pub const RELAY_ADDRESS: Address = address!("0x0000000000000000000000000000000000000901");
pub const FALLBACK_ADDRESS: Address = address!("0x0000000000000000000000000000000000000902");
/// A [Relay] which keeps the default balance handler.
pub const SETTLING_RELAY_ADDRESS: Address = address!("0x0000000000000000000000000000000000000903");

/// Prefix of the key [Relay] writes to in `heavy`.
pub const RELAY_STORE: &[u8] = b"relay/";
pub const RELAY_EVENT: &str = "relay";

/// An in-memory chain with every keeper wired up and the native precompiles active.
pub struct TestChain {
    pub ctx: Context,
    pub coin_info: CoinInfo,
    pub bank: Arc<bank::Keeper>,
    pub accounts: Arc<account::Keeper>,
    pub fee_market: Arc<feemarket::Keeper>,
    pub evm_keeper: Arc<evm::Keeper>,
    pub precompiles: PrecompileSet,
    pub contexts: Arc<CommittedContexts>,
}

/// The outcome of a call run against a fresh transaction state, and the logs it left.
pub struct Called {
    pub outcome: CallOutcome,
    pub logs: Vec<Log>,
}

impl TestChain {
    pub fn new(decimals: u8) -> TestChain {
        let base_denom = if decimals == 18 { "aatom" } else { "uatom" };
        let coin_info = CoinInfo {
            base_denom: base_denom.to_owned(),
            extended_denom: "aatom".to_owned(),
            decimals,
        };
        let header = BlockHeader {
            chain_id: "cosmos_9001-1".to_owned(),
            height: 1,
            time: 1_700_000_000,
            hash: B256::repeat_byte(0xbb),
            proposer: address!("0x00000000000000000000000000000000000000cb"),
            max_gas: Some(BLOCK_GAS_LIMIT),
        };
        let ctx = Context::new(MultiStore::new_root(), header);
        let bank = Arc::new(bank::Keeper::new());
        let accounts = Arc::new(account::Keeper::new());
        let fee_market = Arc::new(feemarket::Keeper::new());
        let evm_keeper = Arc::new(
            evm::Keeper::new(
                coin_info.clone(),
                EVM_CHAIN_ID,
                bank.clone(),
                accounts.clone(),
                fee_market.clone(),
            )
            .unwrap(),
        );
        accounts.ensure_module_account(&ctx, account::FEE_COLLECTOR);

        let precompiles = PrecompileSet::native(
            evm_keeper.clone(),
            Erc20Metadata {
                name: "Atom".to_owned(),
                symbol: "ATOM".to_owned(),
            },
            GasConfig::kv_default(),
        )
        .unwrap();
        let params = EvmParams {
            active_static_precompiles: precompiles.addresses().collect(),
            ..EvmParams::default()
        };
        evm_keeper.set_params(&ctx, &params).unwrap();
        fee_market
            .set_params(
                &ctx,
                &FeeMarketParams {
                    no_base_fee: true,
                    ..FeeMarketParams::default()
                },
            )
            .unwrap();

        TestChain {
            ctx,
            coin_info,
            bank,
            accounts,
            fee_market,
            evm_keeper,
            precompiles,
            contexts: Arc::new(CommittedContexts::new()),
        }
    }

    /// Registers `precompile` and activates it.
    pub fn register(&mut self, precompile: Arc<dyn Precompile>) {
        let address = precompile.address();
        self.precompiles.insert(precompile);
        self.update_evm_params(|params| params.active_static_precompiles.push(address));
    }

    pub fn register_test_precompiles(&mut self) {
        self.register(Arc::new(Relay::new()));
        self.register(Arc::new(Relay::settling()));
        self.register(Arc::new(FallbackOnly::new()));
    }

    pub fn update_evm_params(&self, update: impl FnOnce(&mut EvmParams)) {
        let mut params = self.evm_keeper.get_params(&self.ctx);
        update(&mut params);
        self.evm_keeper.set_params(&self.ctx, &params).unwrap();
    }

    pub fn update_fee_market(&self, update: impl FnOnce(&mut FeeMarketParams)) {
        let mut params = self.fee_market.get_params(&self.ctx);
        update(&mut params);
        self.fee_market.set_params(&self.ctx, &params).unwrap();
    }

    pub fn executor(&self) -> Executor {
        Executor::new(
            self.evm_keeper.clone(),
            self.accounts.clone(),
            self.fee_market.clone(),
            self.precompiles.clone(),
        )
    }

    /// Sets the extended balance of `address`, minting or burning native coins as needed.
    pub fn fund(&self, address: Address, wei: U256) {
        self.evm_keeper.set_balance(&self.ctx, address, wei).unwrap();
    }

    /// The extended balance in wei.
    pub fn balance(&self, address: Address) -> U256 {
        self.evm_keeper.get_balance(&self.ctx, address)
    }

    pub fn native_balance(&self, address: Address) -> U256 {
        self.bank
            .get_balance(&self.ctx, address, &self.coin_info.base_denom)
            .amount
    }

    pub fn nonce(&self, address: Address) -> u64 {
        self.accounts
            .get_account(&self.ctx, address)
            .map(|a| a.sequence)
            .unwrap_or_default()
    }

    /// The wei in one native unit.
    pub fn unit(&self) -> U256 {
        self.coin_info.conversion_factor()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.ctx
            .event_manager()
            .events()
            .into_iter()
            .map(|e| e.ty)
            .collect()
    }

    /// Runs `f` against a fresh transaction state and commits whatever it leaves behind.
    pub fn run(&self, f: impl FnOnce(&mut Evm<'_>) -> CallOutcome) -> Called {
        let ctx = build_evm_execution_ctx(&self.ctx);
        let config = cosmevm::statedb::EvmConfig::from_context(&ctx, self.evm_keeper.as_ref());
        let mut state_db = StateDb::new(ctx, self.evm_keeper.clone(), TxConfig::default());
        let outcome = {
            let mut evm = Evm::new(&mut state_db, config, &self.precompiles);
            f(&mut evm)
        };
        let logs = state_db.logs().to_vec();
        state_db.commit().unwrap();
        Called { outcome, logs }
    }

    pub fn call(&self, caller: Address, to: Address, input: impl Into<Bytes>, gas: u64) -> Called {
        let input = input.into();
        self.run(|evm| evm.call(caller, to, input, gas, U256::ZERO))
    }

    pub fn call_with_value(
        &self,
        caller: Address,
        to: Address,
        input: impl Into<Bytes>,
        gas: u64,
        value: U256,
    ) -> Called {
        let input = input.into();
        self.run(|evm| evm.call(caller, to, input, gas, value))
    }

    pub fn static_call(&self, caller: Address, to: Address, input: impl Into<Bytes>, gas: u64) -> Called {
        let input = input.into();
        self.run(|evm| evm.static_call(caller, to, input, gas))
    }

    /// Records the current state as committed at the current height.
    pub fn commit_block(&self) {
        self.contexts.commit(&self.ctx);
    }

    /// Moves to the next block, clearing the per-block transient state.
    pub fn next_block(&mut self) {
        let mut header = self.ctx.header().clone();
        header.height += 1;
        header.time += 1;
        self.ctx.multi_store().clear_transient();
        self.ctx = self.ctx.with_header(header);
    }
}

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).unwrap()
}

pub fn address_of(key: &SigningKey) -> Address {
    public_key_to_address(key.verifying_key())
}

/// A dynamic-fee call with a zero tip.
pub fn call_tx(nonce: u64, to: Address, input: Bytes, gas_limit: u64, max_fee_per_gas: u128) -> TxEip1559 {
    TxEip1559 {
        chain_id: EVM_CHAIN_ID,
        nonce,
        gas_limit,
        max_fee_per_gas,
        max_priority_fee_per_gas: 0,
        to: TxKind::Call(to),
        input,
        ..Default::default()
    }
}

/// Signs `tx` with `key` and wraps it the way EVM clients submit transactions.
pub fn wrap(key: &SigningKey, tx: TxEip1559) -> CosmosTx {
    let signed = Transaction::from(tx).sign(key).unwrap();
    CosmosTx::ethereum(signed, address_of(key))
}

pub fn transfer_input(to: Address, amount: U256) -> Bytes {
    IERC20::transferCall { to, amount }.abi_encode().into()
}

pub fn balance_of_input(account: Address) -> Bytes {
    IERC20::balanceOfCall { account }.abi_encode().into()
}

pub fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::from(10u64).pow(U256::from(18))
}

const RELAY_ABI: &str = r#"[
    {"type":"function","name":"heavy","stateMutability":"nonpayable",
     "inputs":[{"name":"amount","type":"uint256"}],"outputs":[]},
    {"type":"function","name":"forward","stateMutability":"nonpayable",
     "inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],"outputs":[]},
    {"type":"function","name":"forwardThenRevert","stateMutability":"nonpayable",
     "inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],"outputs":[]}
]"#;

/// A precompile which burns gas on request and forwards ERC-20 transfers of its own balance.
pub struct Relay {
    core: PrecompileCore,
    handles_balances: bool,
}

impl Relay {
    fn at(address: Address, handles_balances: bool) -> Relay {
        Relay {
            core: PrecompileCore {
                address,
                abi: PrecompileAbi::from_json(RELAY_ABI).unwrap(),
                kv_gas_config: GasConfig::kv_default(),
            },
            handles_balances,
        }
    }

    pub fn new() -> Relay {
        Relay::at(RELAY_ADDRESS, false)
    }

    pub fn settling() -> Relay {
        Relay::at(SETTLING_RELAY_ADDRESS, true)
    }

    /// Emits a relay event, then transfers from the relay's own balance through the ERC-20 precompile.
    fn forward(
        ctx: &Context,
        evm: &mut Evm<'_>,
        contract: &Contract,
        args: &[DynSolValue],
    ) -> Result<(), PrecompileError> {
        let to = cosmevm::precompiles::abi::address_arg(args, 0)?;
        let amount = uint_arg(args, 1)?;
        ctx.event_manager().emit_event(Event::new(RELAY_EVENT));
        let outcome = cross_call(
            ctx,
            evm,
            contract.address,
            NATIVE_ERC20_ADDRESS,
            transfer_input(to, amount),
            U256::ZERO,
        )?;
        if !outcome.is_ok() {
            return Err(PrecompileError::ExecutionReverted(Some(outcome.output)));
        }
        Ok(())
    }
}

impl Precompile for Relay {
    fn core(&self) -> &PrecompileCore {
        &self.core
    }

    fn uses_balance_handler(&self, method: &Method) -> bool {
        self.handles_balances && self.is_transaction(method)
    }

    fn execute(
        &self,
        ctx: &Context,
        evm: &mut Evm<'_>,
        contract: &Contract,
        method: &Method,
        args: &[DynSolValue],
    ) -> Result<Bytes, PrecompileError> {
        match method.name.as_str() {
            "heavy" => {
                let amount = uint_arg(args, 0)?;
                ctx.kv_store(RELAY_STORE).set(b"heavy", vec![1]);
                ctx.event_manager().emit_event(Event::new(RELAY_EVENT));
                ctx.gas_meter().consume_gas(amount.to::<u64>(), "heavy");
            }
            "forward" => Relay::forward(ctx, evm, contract, args)?,
            "forwardThenRevert" => {
                Relay::forward(ctx, evm, contract, args)?;
                return Err(PrecompileError::revert("relay reverted"));
            }
            other => return Err(PrecompileError::revert(format!("unknown method: {other}"))),
        }
        Ok(Bytes::new())
    }
}

/// A precompile whose only entry point is its fallback function.
pub struct FallbackOnly {
    core: PrecompileCore,
}

impl FallbackOnly {
    pub fn new() -> FallbackOnly {
        FallbackOnly {
            core: PrecompileCore {
                address: FALLBACK_ADDRESS,
                abi: PrecompileAbi::from_json(r#"[{"type":"fallback","stateMutability":"nonpayable"}]"#)
                    .unwrap(),
                kv_gas_config: GasConfig::kv_default(),
            },
        }
    }
}

impl Precompile for FallbackOnly {
    fn core(&self) -> &PrecompileCore {
        &self.core
    }

    fn execute(
        &self,
        ctx: &Context,
        _: &mut Evm<'_>,
        _: &Contract,
        method: &Method,
        _: &[DynSolValue],
    ) -> Result<Bytes, PrecompileError> {
        assert_eq!(method.name, "fallback");
        ctx.kv_store(RELAY_STORE).set(b"fallback", vec![1]);
        Ok(Bytes::new())
    }
}
