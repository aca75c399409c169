use alloy::{
    consensus::TxLegacy,
    primitives::{Address, Bytes, TxKind, U256, address, bytes, keccak256},
    sol_types::SolCall,
};
use cosmevm::{
    error::EvmError,
    exec::EVENT_TYPE_ETHEREUM_TX,
    keeper::{
        AccountKeeper, EvmKeeper, account,
        account::{Account, AccountKind},
    },
    precompiles::NATIVE_ERC20_ADDRESS,
    statedb::StateAccount,
    transaction::{CosmosTx, Transaction},
    units::Dec,
};

use crate::{
    BLOCK_GAS_LIMIT, IERC20, TestChain, address_of, call_tx, ether, signing_key, transfer_input,
    wrap,
};

const BOB: Address = address!("0x0000000000000000000000000000000000000b0b");

/// One native unit per gas at 6 decimals.
const PRICE: u128 = 1_000_000_000_000;

#[cosmevm_macros::test(decimals = 18)]
fn max_fee_below_the_base_fee_is_rejected(chain: TestChain) {
    chain.update_fee_market(|params| {
        params.no_base_fee = false;
        params.base_fee = Dec::from_u64(10);
    });
    let key = signing_key(1);
    let sender = address_of(&key);
    chain.fund(sender, ether(1));
    let events = chain.ctx.event_manager().len();

    let tx = wrap(&key, call_tx(0, BOB, Bytes::new(), 21_000, 5));
    let err = chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap_err();

    assert!(matches!(err, EvmError::InvalidGasFee(_)), "{err:?}");
    assert_eq!(chain.nonce(sender), 0);
    assert_eq!(chain.balance(sender), ether(1));
    assert_eq!(chain.ctx.event_manager().len(), events);
}

#[cosmevm_macros::test(decimals = 18)]
fn base_fee_caps_the_effective_price(chain: TestChain) {
    chain.update_fee_market(|params| {
        params.no_base_fee = false;
        params.base_fee = Dec::from_u64(10);
    });
    let key = signing_key(1);
    let sender = address_of(&key);
    chain.fund(sender, ether(1));

    // The tip is zero, so the sender pays the base fee even though it offered more.
    let tx = wrap(&key, call_tx(0, BOB, Bytes::new(), 21_000, 1_000));
    let result = chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap();

    assert!(result.success);
    assert_eq!(result.gas_used, 21_000);
    assert_eq!(chain.balance(sender), ether(1) - U256::from(21_000 * 10));
    assert_eq!(chain.nonce(sender), 1);
}

#[cosmevm_macros::test]
fn gas_price_below_the_minimum_is_rejected(chain: TestChain) {
    chain.update_fee_market(|params| params.min_gas_price = Dec::from_u64(1));
    let key = signing_key(2);
    let sender = address_of(&key);
    chain.fund(sender, ether(1));

    let tx = wrap(&key, call_tx(0, BOB, Bytes::new(), 21_000, PRICE / 10));
    let err = chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap_err();

    assert!(matches!(err, EvmError::InvalidGasPrice(_)), "{err:?}");
    assert_eq!(chain.nonce(sender), 0);

    let tx = wrap(&key, call_tx(0, BOB, Bytes::new(), 21_000, PRICE));
    assert!(chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap().success);
}

#[cosmevm_macros::test]
fn nonce_increments_and_replays_are_rejected(chain: TestChain) {
    let key = signing_key(3);
    let sender = address_of(&key);
    chain.fund(sender, ether(1));
    let tx = wrap(&key, call_tx(0, BOB, Bytes::new(), 21_000, PRICE));

    chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap();
    assert_eq!(chain.nonce(sender), 1);

    let err = chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap_err();
    assert_eq!(err, EvmError::InvalidSequence { expected: 1, got: 0 });
    assert_eq!(chain.nonce(sender), 1);

    let next = wrap(&key, call_tx(1, BOB, Bytes::new(), 21_000, PRICE));
    chain.executor().deliver_tx(&chain.ctx, &next, None).unwrap();
    assert_eq!(chain.nonce(sender), 2);
}

#[cosmevm_macros::test]
fn wrong_chain_id_is_rejected(chain: TestChain) {
    let key = signing_key(4);
    let sender = address_of(&key);
    chain.fund(sender, ether(1));
    let mut tx = call_tx(0, BOB, Bytes::new(), 21_000, PRICE);
    tx.chain_id = 1;

    let err = chain
        .executor()
        .deliver_tx(&chain.ctx, &wrap(&key, tx), None)
        .unwrap_err();

    assert!(matches!(err, EvmError::InvalidChainId(_)), "{err:?}");
    assert_eq!(chain.nonce(sender), 0);
}

#[cosmevm_macros::test]
fn memo_is_not_allowed(chain: TestChain) {
    let key = signing_key(5);
    let mut tx = wrap(&key, call_tx(0, BOB, Bytes::new(), 21_000, PRICE));
    tx.memo = "hello".to_owned();

    let err = chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap_err();

    assert!(matches!(err, EvmError::InvalidRequest(_)), "{err:?}");
}

#[cosmevm_macros::test]
fn unaffordable_fee_is_rejected(chain: TestChain) {
    let key = signing_key(6);
    let sender = address_of(&key);
    chain.fund(sender, chain.unit() * U256::from(20_999));

    let tx = wrap(&key, call_tx(0, BOB, Bytes::new(), 21_000, PRICE));
    let err = chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap_err();

    assert!(matches!(err, EvmError::InsufficientFunds(_)), "{err:?}");
    assert_eq!(chain.nonce(sender), 0);
    assert_eq!(chain.balance(sender), chain.unit() * U256::from(20_999));
}

#[cosmevm_macros::test]
fn gas_wanted_above_the_block_limit_is_rejected(chain: TestChain) {
    let key = signing_key(7);
    let tx = wrap(&key, call_tx(0, BOB, Bytes::new(), BLOCK_GAS_LIMIT + 1, 0));

    let err = chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap_err();

    assert!(matches!(err, EvmError::InvalidGasLimit(_)), "{err:?}");
}

#[cosmevm_macros::test]
fn erc20_transfer_transaction_pays_for_the_gas_it_used(chain: TestChain) {
    let key = signing_key(8);
    let sender = address_of(&key);
    chain.fund(sender, ether(1));
    let amount = chain.unit() * U256::from(2);
    let fee_collector = account::module_address(account::FEE_COLLECTOR);
    let collected = chain.balance(fee_collector);

    let tx = wrap(
        &key,
        call_tx(0, NATIVE_ERC20_ADDRESS, transfer_input(BOB, amount), 100_000, PRICE),
    );
    let result = chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap();

    assert!(result.success, "{:?}", result.vm_error);
    assert!(IERC20::transferCall::abi_decode_returns(&result.return_value, true).unwrap()._0);
    assert!(result.gas_used > 21_000 && result.gas_used < 100_000);
    assert_eq!(result.logs.len(), 1);
    let paid = U256::from(result.gas_used) * U256::from(PRICE);
    assert_eq!(chain.balance(sender), ether(1) - amount - paid);
    assert_eq!(chain.balance(BOB), amount);
    assert_eq!(chain.balance(fee_collector), collected + paid);
    assert_eq!(chain.nonce(sender), 1);
    assert!(
        chain
            .event_types()
            .iter()
            .any(|ty| ty == EVENT_TYPE_ETHEREUM_TX)
    );
}

#[cosmevm_macros::test]
fn failed_message_still_charges_gas_and_bumps_the_nonce(chain: TestChain) {
    let key = signing_key(9);
    let sender = address_of(&key);
    chain.fund(sender, ether(1));

    let tx = wrap(
        &key,
        call_tx(0, NATIVE_ERC20_ADDRESS, transfer_input(BOB, ether(2)), 100_000, PRICE),
    );
    let result = chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap();

    assert!(!result.success);
    assert_eq!(
        result.vm_error.as_deref(),
        Some("execution reverted: ERC20: transfer amount exceeds balance")
    );
    assert!(result.logs.is_empty());
    let paid = U256::from(result.gas_used) * U256::from(PRICE);
    assert_eq!(chain.balance(sender), ether(1) - paid);
    assert_eq!(chain.balance(BOB), U256::ZERO);
    assert_eq!(chain.nonce(sender), 1);
}

#[cosmevm_macros::test]
fn sender_must_match_the_signature(chain: TestChain) {
    let key = signing_key(10);
    let sender = address_of(&key);
    chain.fund(sender, ether(1));
    let signed = Transaction::from(call_tx(0, BOB, Bytes::new(), 21_000, PRICE))
        .sign(&key)
        .unwrap();
    let tx = CosmosTx::ethereum(signed, BOB);

    let err = chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap_err();

    assert!(matches!(err, EvmError::InvalidSigner(_)), "{err:?}");
    assert_eq!(chain.nonce(sender), 0);
    assert_eq!(chain.balance(sender), ether(1));
}

#[cosmevm_macros::test]
fn unprotected_transactions_need_to_be_allowed(chain: TestChain) {
    let key = signing_key(11);
    let sender = address_of(&key);
    chain.fund(sender, ether(1));
    let legacy = TxLegacy {
        chain_id: None,
        nonce: 0,
        gas_price: PRICE,
        gas_limit: 21_000,
        to: TxKind::Call(BOB),
        ..Default::default()
    };
    let tx = CosmosTx::ethereum(Transaction::from(legacy).sign(&key).unwrap(), sender);

    let err = chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap_err();
    assert!(matches!(err, EvmError::NotSupported(_)), "{err:?}");
    assert_eq!(chain.nonce(sender), 0);

    chain.update_evm_params(|params| params.allow_unprotected_txs = true);
    let result = chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap();
    assert!(result.success);
    assert_eq!(chain.nonce(sender), 1);
}

#[cosmevm_macros::test]
fn module_accounts_cannot_send(chain: TestChain) {
    let key = signing_key(12);
    let sender = address_of(&key);
    chain.fund(sender, ether(1));
    chain.accounts.set_account(
        &chain.ctx,
        &Account {
            address: sender,
            account_number: 1_000,
            sequence: 0,
            kind: AccountKind::Module {
                name: "mint".to_owned(),
            },
        },
    );

    let tx = wrap(&key, call_tx(0, BOB, Bytes::new(), 21_000, PRICE));
    let err = chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap_err();

    assert!(matches!(err, EvmError::InvalidAccount(_)), "{err:?}");
    assert_eq!(chain.balance(sender), ether(1));
    assert!(matches!(
        chain.accounts.get_account(&chain.ctx, sender),
        Some(Account { sequence: 0, .. })
    ));
}

#[cosmevm_macros::test]
fn contracts_cannot_send(chain: TestChain) {
    let key = signing_key(13);
    let sender = address_of(&key);
    let code = bytes!("0x6001600055");
    let code_hash = keccak256(&code);
    chain.evm_keeper.set_code(&chain.ctx, code_hash, &code);
    chain
        .evm_keeper
        .set_account(
            &chain.ctx,
            sender,
            &StateAccount {
                nonce: 0,
                balance: ether(1),
                code_hash,
            },
        )
        .unwrap();

    let tx = wrap(&key, call_tx(0, BOB, Bytes::new(), 21_000, PRICE));
    let err = chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap_err();

    assert!(matches!(err, EvmError::InvalidAccount(_)), "{err:?}");
    assert_eq!(chain.nonce(sender), 0);
    assert_eq!(chain.balance(sender), ether(1));
}

#[cosmevm_macros::test]
fn fee_dust_stays_with_the_sender(chain: TestChain) {
    let key = signing_key(14);
    let sender = address_of(&key);
    let dust = U256::from(17);
    chain.fund(sender, ether(1) + dust);
    let fee_collector = account::module_address(account::FEE_COLLECTOR);
    let collected = chain.balance(fee_collector);
    let total = chain.balance(sender) + collected;

    // Each fee is 21,000 native units plus 21,000 wei, which cannot be taken natively.
    for nonce in 0..2 {
        let tx = wrap(&key, call_tx(nonce, BOB, Bytes::new(), 21_000, PRICE + 1));
        let result = chain.executor().deliver_tx(&chain.ctx, &tx, None).unwrap();
        assert!(result.success);
        assert_eq!(result.gas_used, 21_000);
    }

    let paid = U256::from(2 * 21_000) * chain.unit();
    assert_eq!(chain.balance(sender), ether(1) + dust - paid);
    assert_eq!(chain.evm_keeper.fractional_balance(&chain.ctx, sender), dust);
    assert_eq!(chain.balance(fee_collector), collected + paid);
    assert_eq!(chain.balance(sender) + chain.balance(fee_collector), total);
}
