use std::sync::Arc;

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, B256, Bytes, U64, U256, address, bytes, keccak256},
};
use cosmevm::{
    error::EvmError,
    keeper::EvmKeeper,
    rpc::{
        AccountProof, BalanceSource, BalanceSourceKind, CommittedContexts, ContextFactory, RpcBackend,
        RpcConfig, rpc_module,
    },
    statedb::StateAccount,
};

use crate::TestChain;

const ALICE: Address = address!("0x00000000000000000000000000000000000a11ce");
const CONTRACT: Address = address!("0x00000000000000000000000000000000c0ffee00");

fn backend(chain: &TestChain, config: &RpcConfig) -> Result<RpcBackend, EvmError> {
    RpcBackend::new(
        chain.bank.clone(),
        chain.coin_info.base_denom.clone(),
        chain.contexts.clone(),
        chain.evm_keeper.clone(),
        chain.accounts.clone(),
        config,
    )
}

fn bank_config(scale_exponent: u8) -> RpcConfig {
    RpcConfig {
        balance_source: BalanceSourceKind::Bank,
        scale_exponent,
    }
}

/// Commits two blocks. ALICE holds three native units and some dust at height 1 and five units at height 2.
fn two_blocks(chain: &mut TestChain) {
    chain.fund(ALICE, chain.unit() * U256::from(3) + U256::from(17));
    chain.commit_block();
    chain.next_block();
    chain.fund(ALICE, chain.unit() * U256::from(5));
    chain.commit_block();
}

#[cosmevm_macros::test]
fn balances_are_read_at_the_requested_height(mut chain: TestChain) {
    two_blocks(&mut chain);
    let backend = backend(&chain, &RpcConfig::default()).unwrap();
    assert_eq!(backend.balance_source(), BalanceSource::EvmState);

    assert_eq!(
        backend.get_balance(ALICE, BlockNumberOrTag::Number(1)).unwrap(),
        chain.unit() * U256::from(3) + U256::from(17)
    );
    assert_eq!(
        backend.get_balance(ALICE, BlockNumberOrTag::Latest).unwrap(),
        chain.unit() * U256::from(5)
    );
    assert_eq!(
        backend.get_balance(ALICE, BlockNumberOrTag::Earliest).unwrap(),
        backend.get_balance(ALICE, BlockNumberOrTag::Number(1)).unwrap()
    );
}

#[cosmevm_macros::test]
fn uncommitted_state_is_not_visible(mut chain: TestChain) {
    two_blocks(&mut chain);
    let backend = backend(&chain, &RpcConfig::default()).unwrap();

    chain.fund(ALICE, U256::ZERO);

    assert_eq!(
        backend.get_balance(ALICE, BlockNumberOrTag::Pending).unwrap(),
        chain.unit() * U256::from(5)
    );
}

#[cosmevm_macros::test]
fn future_heights_are_rejected(mut chain: TestChain) {
    two_blocks(&mut chain);
    let backend = backend(&chain, &RpcConfig::default()).unwrap();

    let err = backend
        .get_balance(ALICE, BlockNumberOrTag::Number(3))
        .unwrap_err();

    assert!(matches!(err, EvmError::InvalidHeight(_)), "{err:?}");
    assert_eq!(backend.resolve_height(BlockNumberOrTag::Finalized).unwrap(), 2);
}

#[cosmevm_macros::test]
fn bank_balances_are_scaled(mut chain: TestChain) {
    two_blocks(&mut chain);
    let backend = backend(&chain, &bank_config(12)).unwrap();
    assert_eq!(
        backend.balance_source(),
        BalanceSource::Bank { scale_exponent: 12 }
    );

    // The dust is not part of the bank balance.
    assert_eq!(
        backend.get_balance(ALICE, BlockNumberOrTag::Number(1)).unwrap(),
        U256::from(3) * U256::from(10).pow(U256::from(12))
    );
}

#[cosmevm_macros::test]
fn backend_configuration_is_validated(chain: TestChain) {
    let err = RpcBackend::new(
        chain.bank.clone(),
        "",
        chain.contexts.clone(),
        chain.evm_keeper.clone(),
        chain.accounts.clone(),
        &RpcConfig::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, EvmError::InvalidChainConfig(_)), "{err:?}");

    let err = backend(&chain, &bank_config(19)).err().unwrap();
    assert!(matches!(err, EvmError::InvalidChainConfig(_)), "{err:?}");
}

#[cosmevm_macros::test]
fn accounts_code_and_storage_are_served(chain: TestChain) {
    let code = bytes!("0x6001600055");
    let code_hash = keccak256(&code);
    let key = B256::with_last_byte(1);
    let value = B256::with_last_byte(0x2a);
    chain.evm_keeper.set_code(&chain.ctx, code_hash, &code);
    chain
        .evm_keeper
        .set_account(
            &chain.ctx,
            CONTRACT,
            &StateAccount {
                nonce: 4,
                balance: chain.unit(),
                code_hash,
            },
        )
        .unwrap();
    chain.evm_keeper.set_state(&chain.ctx, CONTRACT, key, value);
    chain.commit_block();
    let backend = backend(&chain, &RpcConfig::default()).unwrap();
    let latest = BlockNumberOrTag::Latest;

    assert_eq!(backend.get_transaction_count(CONTRACT, latest).unwrap(), 4);
    assert_eq!(backend.get_transaction_count(ALICE, latest).unwrap(), 0);
    assert_eq!(backend.get_code(CONTRACT, latest).unwrap(), code);
    assert_eq!(backend.get_code(ALICE, latest).unwrap(), Bytes::new());
    assert_eq!(backend.get_storage_at(CONTRACT, key, latest).unwrap(), value);

    let proof = backend
        .get_proof(CONTRACT, &[key, B256::with_last_byte(2)], latest)
        .unwrap();
    assert_eq!(proof.balance, chain.unit());
    assert_eq!(proof.nonce, U64::from(4));
    assert_eq!(proof.code_hash, code_hash);
    assert_eq!(proof.storage_hash, B256::ZERO);
    assert!(proof.account_proof.is_empty());
    assert_eq!(proof.storage_proof.len(), 2);
    assert_eq!(proof.storage_proof[0].value, U256::from(0x2a));
    assert_eq!(proof.storage_proof[1].value, U256::ZERO);
}

#[tokio::test]
async fn json_rpc_methods_are_served() {
    let mut chain = TestChain::new(6);
    two_blocks(&mut chain);
    let module = rpc_module(Arc::new(backend(&chain, &RpcConfig::default()).unwrap())).unwrap();

    let balance: U256 = module
        .call("eth_getBalance", (ALICE, "0x1"))
        .await
        .unwrap();
    assert_eq!(balance, chain.unit() * U256::from(3) + U256::from(17));

    // The block parameter defaults to the latest block.
    let balance: U256 = module.call("eth_getBalance", (ALICE,)).await.unwrap();
    assert_eq!(balance, chain.unit() * U256::from(5));

    let nonce: U64 = module
        .call("eth_getTransactionCount", (ALICE, "latest"))
        .await
        .unwrap();
    assert_eq!(nonce, U64::ZERO);

    let proof: AccountProof = module
        .call("eth_getProof", (ALICE, Vec::<U256>::new(), "latest"))
        .await
        .unwrap();
    assert_eq!(proof.address, ALICE);
    assert_eq!(proof.storage_hash, B256::ZERO);

    let err = module
        .call::<_, U256>("eth_getBalance", (ALICE, "0x9"))
        .await
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("must be less than or equal to the current blockchain height"),
        "{err}"
    );
}

#[cosmevm_macros::test]
fn only_recent_heights_stay_queryable(mut chain: TestChain) {
    let contexts = CommittedContexts::with_retention(2);
    for _ in 0..3 {
        contexts.commit(&chain.ctx);
        chain.next_block();
    }
    let latest = contexts.latest_height();
    assert_eq!(latest, chain.ctx.block_height() - 1);
    assert!(contexts.context_at(latest).is_ok());
    assert!(contexts.context_at(latest - 1).is_ok());
    assert!(matches!(
        contexts.context_at(latest - 2),
        Err(EvmError::InvalidHeight(_))
    ));
}
