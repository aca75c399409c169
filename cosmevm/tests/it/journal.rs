use alloy::{
    primitives::{Address, U256, address},
    sol_types::SolCall,
};
use cosmevm::{error::revert_reason, precompiles::NATIVE_ERC20_ADDRESS};

use crate::{IRelay, RELAY_ADDRESS, RELAY_EVENT, TestChain, transfer_input};

const ALICE: Address = address!("0x00000000000000000000000000000000000a11ce");
const BOB: Address = address!("0x0000000000000000000000000000000000000b0b");

#[cosmevm_macros::test]
fn outer_revert_undoes_a_nested_transfer(mut chain: TestChain) {
    chain.register_test_precompiles();
    let ten = chain.unit() * U256::from(10);
    chain.fund(RELAY_ADDRESS, ten);
    let native_before = chain.native_balance(RELAY_ADDRESS);
    let events = chain.ctx.event_manager().len();

    let input = IRelay::forwardThenRevertCall { to: BOB, amount: ten }.abi_encode();
    let called = chain.call(ALICE, RELAY_ADDRESS, input, 200_000);

    assert!(called.outcome.is_revert());
    assert_eq!(
        revert_reason(&called.outcome.output).as_deref(),
        Some("relay reverted")
    );
    assert_eq!(chain.native_balance(RELAY_ADDRESS), native_before);
    assert_eq!(chain.balance(RELAY_ADDRESS), ten);
    assert_eq!(chain.balance(BOB), U256::ZERO);
    // Neither the Transfer log nor the bank events of the nested frame survive.
    assert!(called.logs.is_empty());
    assert_eq!(chain.ctx.event_manager().len(), events);
}

#[cosmevm_macros::test]
fn nested_transfer_is_settled_once(mut chain: TestChain) {
    chain.register_test_precompiles();
    let ten = chain.unit() * U256::from(10);
    chain.fund(RELAY_ADDRESS, ten);

    let input = IRelay::forwardCall {
        to: BOB,
        amount: U256::from(4) * chain.unit(),
    }
    .abi_encode();
    let called = chain.call(ALICE, RELAY_ADDRESS, input, 200_000);

    assert!(called.outcome.is_ok());
    assert_eq!(chain.balance(RELAY_ADDRESS), U256::from(6) * chain.unit());
    assert_eq!(chain.balance(BOB), U256::from(4) * chain.unit());
    assert_eq!(chain.native_balance(BOB), U256::from(4));
    assert_eq!(called.logs.len(), 1);
    // The relay's event precedes the nested frame's bank events.
    let types = chain.event_types();
    let relay = types.iter().position(|ty| ty == RELAY_EVENT).unwrap();
    let transfer = types.iter().position(|ty| ty == "transfer").unwrap();
    assert!(relay < transfer);
    // Both frames pay their required gas: 2000 + 30 * 64 each under the default schedule.
    assert!(called.outcome.gas_left <= 200_000 - 2 * 3920);
}

#[cosmevm_macros::test]
fn failed_nested_transfer_fails_the_caller(mut chain: TestChain) {
    chain.register_test_precompiles();
    chain.fund(RELAY_ADDRESS, U256::from(5));

    let input = IRelay::forwardCall {
        to: BOB,
        amount: U256::from(6),
    }
    .abi_encode();
    let called = chain.call(ALICE, RELAY_ADDRESS, input, 200_000);

    assert!(called.outcome.is_revert());
    assert_eq!(
        revert_reason(&called.outcome.output).as_deref(),
        Some("ERC20: transfer amount exceeds balance")
    );
    assert_eq!(chain.balance(RELAY_ADDRESS), U256::from(5));
}

#[cosmevm_macros::test]
fn earlier_frames_survive_a_later_revert(chain: TestChain) {
    let unit = chain.unit();
    chain.fund(ALICE, unit * U256::from(3));
    let events = chain.ctx.event_manager().len();

    let called = chain.run(|evm| {
        let first = evm.call(
            ALICE,
            NATIVE_ERC20_ADDRESS,
            transfer_input(BOB, unit),
            100_000,
            U256::ZERO,
        );
        assert!(first.is_ok());
        evm.call(
            ALICE,
            NATIVE_ERC20_ADDRESS,
            transfer_input(BOB, unit * U256::from(5)),
            100_000,
            U256::ZERO,
        )
    });

    assert!(called.outcome.is_revert());
    assert_eq!(chain.balance(ALICE), unit * U256::from(2));
    assert_eq!(chain.balance(BOB), unit);
    assert_eq!(called.logs.len(), 1);
    // coin_spent, coin_received and transfer of the first call only.
    assert_eq!(chain.ctx.event_manager().len(), events + 3);
}

#[cosmevm_macros::test]
fn value_sent_to_a_plain_account_is_reverted_with_the_frame(chain: TestChain) {
    let unit = chain.unit();
    chain.fund(ALICE, unit);

    let called = chain.run(|evm| evm.call(ALICE, BOB, Default::default(), 21_000, unit * U256::from(2)));

    assert_eq!(
        called.outcome.result,
        revm::interpreter::InstructionResult::OutOfFunds
    );
    assert_eq!(called.outcome.gas_left, 21_000);
    assert_eq!(chain.balance(ALICE), unit);
    assert_eq!(chain.balance(BOB), U256::ZERO);

    let called = chain.run(|evm| evm.call(ALICE, BOB, Default::default(), 21_000, unit));
    assert!(called.outcome.is_ok());
    assert_eq!(chain.balance(BOB), unit);
    assert_eq!(chain.native_balance(BOB), U256::from(1));
}
