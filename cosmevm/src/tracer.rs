use std::collections::HashSet;

use alloy::primitives::{Address, Bytes, U256};
use revm::interpreter::InstructionResult;

/// Callbacks from the EVM frame driver.
pub trait Tracer {
    fn on_enter(&mut self, depth: usize, from: Address, to: Address, input: &Bytes, gas: u64, value: U256) {
        let _ = value;
        let _ = gas;
        let _ = input;
        let _ = to;
        let _ = from;
        let _ = depth;
    }
    fn on_exit(&mut self, depth: usize, output: &Bytes, gas_used: u64, result: InstructionResult) {
        let _ = result;
        let _ = gas_used;
        let _ = output;
        let _ = depth;
    }
    /// Value moved by a precompile's balance settlement.
    fn on_balance_change(&mut self, address: Address, amount: U256, add: bool) {
        let _ = add;
        let _ = amount;
        let _ = address;
    }
}

impl<T: Tracer> Tracer for &mut T {
    fn on_enter(&mut self, depth: usize, from: Address, to: Address, input: &Bytes, gas: u64, value: U256) {
        (*self).on_enter(depth, from, to, input, gas, value)
    }

    fn on_exit(&mut self, depth: usize, output: &Bytes, gas_used: u64, result: InstructionResult) {
        (*self).on_exit(depth, output, gas_used, result)
    }

    fn on_balance_change(&mut self, address: Address, amount: U256, add: bool) {
        (*self).on_balance_change(address, amount, add)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

pub fn noop() -> NoopTracer {
    NoopTracer
}

/// Records every address a transaction touched.
#[derive(Debug, Default)]
pub struct TouchedAddressTracer {
    pub touched: HashSet<Address>,
}

impl Tracer for TouchedAddressTracer {
    fn on_enter(&mut self, _: usize, from: Address, to: Address, _: &Bytes, _: u64, _: U256) {
        self.touched.insert(from);
        self.touched.insert(to);
    }

    fn on_balance_change(&mut self, address: Address, _: U256, _: bool) {
        self.touched.insert(address);
    }
}
