use std::{fs, sync::Arc};

use alloy::{
    primitives::{Address, B256, U256, address},
    sol_types::SolCall,
};
use cosmevm::{
    cfg::Config,
    host::{BlockHeader, Context, MultiStore},
    keeper::{EvmKeeper, FeeMarketKeeper, account, bank, evm, feemarket},
    precompiles::{NATIVE_ERC20_ADDRESS, WERC20_ADDRESS},
    rpc::{BalanceSource, CommittedContexts},
    units::Dec,
};

use crate::{IERC20, TestChain, balance_of_input};

const ALICE: Address = address!("0x00000000000000000000000000000000000a11ce");

const CHAIN: &str = r#"
[chain]
chain_id = "testing_4242-1"
evm_chain_id = 4242
base_denom = "utest"
extended_denom = "atest"
decimals = 6

[erc20]
name = "Test"
symbol = "TST"
"#;

const PARAMS: &str = r#"
[evm]
active_static_precompiles = ["0x0000000000000000000000000000000000000802"]

[fee_market]
no_base_fee = true
min_gas_price = "0.25"

[precompile_gas.kv]
has = 0
delete = 0
read_flat = 500
read_per_byte = 1
write_flat = 1000
write_per_byte = 10
iter_next_flat = 0

[rpc]
balance_source = "bank"
scale_exponent = 12
"#;

fn load() -> Config {
    let dir = tempfile::tempdir().unwrap();
    let chain = dir.path().join("chain.toml");
    let params = dir.path().join("params.toml");
    fs::write(&chain, CHAIN).unwrap();
    fs::write(&params, PARAMS).unwrap();
    Config::load(&[chain, params]).unwrap()
}

/// Wires the keepers up from `config` the way a node does at genesis.
fn chain_from(config: &Config) -> TestChain {
    let coin_info = config.chain.coin_info();
    let header = BlockHeader {
        chain_id: config.chain.chain_id.clone(),
        height: 1,
        time: 1_700_000_000,
        hash: B256::repeat_byte(0xcc),
        proposer: Address::ZERO,
        max_gas: None,
    };
    let ctx = Context::new(MultiStore::new_root(), header);
    let bank = Arc::new(bank::Keeper::new());
    let accounts = Arc::new(account::Keeper::new());
    let fee_market = Arc::new(feemarket::Keeper::new());
    let evm_keeper = Arc::new(
        evm::Keeper::new(
            coin_info.clone(),
            config.chain.evm_chain_id,
            bank.clone(),
            accounts.clone(),
            fee_market.clone(),
        )
        .unwrap(),
    );
    config
        .init_genesis(&ctx, evm_keeper.as_ref(), fee_market.as_ref())
        .unwrap();
    let precompiles = config.precompiles(evm_keeper.clone()).unwrap();

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

#[test]
fn configuration_files_are_merged() {
    let config = load();

    assert_eq!(config.chain.evm_chain_id, 4242);
    assert_eq!(config.chain.coin_info().extended_denom, "atest");
    assert_eq!(config.erc20.symbol, "TST");
    assert_eq!(config.evm.active_static_precompiles, vec![NATIVE_ERC20_ADDRESS]);
    assert_eq!(config.precompile_gas.kv.read_flat, 500);
    assert_eq!(
        config.rpc.balance_source(),
        BalanceSource::Bank { scale_exponent: 12 }
    );
}

#[test]
fn genesis_writes_the_module_params() {
    let config = load();
    let chain = chain_from(&config);

    assert_eq!(chain.evm_keeper.chain_id(), 4242);
    assert_eq!(chain.evm_keeper.get_params(&chain.ctx), config.evm);
    assert_eq!(chain.fee_market.get_params(&chain.ctx), config.fee_market);
    assert!(!chain.fee_market.get_base_fee_enabled(&chain.ctx));
    assert_eq!(chain.evm_keeper.get_base_fee(&chain.ctx), None);
    // 0.25 native units per gas, in wei.
    assert_eq!(
        chain.evm_keeper.get_min_gas_price(&chain.ctx),
        Dec::from_u64(250_000_000_000)
    );
}

#[test]
fn configured_precompiles_use_the_configured_schedule() {
    let config = load();
    let chain = chain_from(&config);
    chain.fund(ALICE, U256::from(77));

    let called = chain.call(ALICE, NATIVE_ERC20_ADDRESS, balance_of_input(ALICE), 10_000);

    assert!(called.outcome.is_ok());
    // 500 + 1 * 32.
    assert_eq!(called.outcome.gas_left, 10_000 - 532);
    assert_eq!(
        IERC20::balanceOfCall::abi_decode_returns(&called.outcome.output, true)
            .unwrap()
            ._0,
        U256::from(77)
    );

    let called = chain.call(ALICE, NATIVE_ERC20_ADDRESS, IERC20::symbolCall {}.abi_encode(), 10_000);
    assert_eq!(
        IERC20::symbolCall::abi_decode_returns(&called.outcome.output, true)
            .unwrap()
            ._0,
        "TST"
    );
}

#[test]
fn registered_but_inactive_precompiles_are_not_callable() {
    let config = load();
    let chain = chain_from(&config);
    assert!(chain.precompiles.contains(&WERC20_ADDRESS));

    let called = chain.call(ALICE, WERC20_ADDRESS, balance_of_input(ALICE), 10_000);

    assert!(called.outcome.is_revert());
    assert_eq!(called.outcome.gas_left, 10_000);
}

#[test]
fn missing_files_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.toml");

    let err = Config::load(&[missing]).unwrap_err();

    assert!(err.to_string().contains("failed to read"), "{err}");
}
