//! Host gas meters. Running past a meter's limit panics with an [OutOfGas] payload, which only precompile frames catch
//! (see [catch_out_of_gas]).

use std::{
    fmt::Debug,
    panic::{self, AssertUnwindSafe},
    sync::{
        Once,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};

pub type Gas = u64;

/// Panic payload raised when a meter is consumed past its limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutOfGas {
    pub descriptor: String,
}

/// Panic payload raised when gas arithmetic overflows. Never caught.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasOverflow {
    pub descriptor: String,
}

pub trait GasMeter: Debug + Send + Sync {
    fn gas_consumed(&self) -> Gas;
    /// Consumed gas, capped at the limit.
    fn gas_consumed_to_limit(&self) -> Gas;
    fn gas_remaining(&self) -> Gas;
    fn limit(&self) -> Gas;
    fn consume_gas(&self, amount: Gas, descriptor: &str);
    fn refund_gas(&self, amount: Gas, descriptor: &str);
    fn is_past_limit(&self) -> bool;
    fn is_out_of_gas(&self) -> bool;
}

fn add_or_overflow(consumed: &AtomicU64, amount: Gas, descriptor: &str) -> Gas {
    let current = consumed.load(Ordering::Relaxed);
    match current.checked_add(amount) {
        Some(total) => {
            consumed.store(total, Ordering::Relaxed);
            total
        }
        None => {
            consumed.store(Gas::MAX, Ordering::Relaxed);
            panic::panic_any(GasOverflow {
                descriptor: descriptor.to_owned(),
            })
        }
    }
}

fn refund(consumed: &AtomicU64, amount: Gas, descriptor: &str) {
    let current = consumed.load(Ordering::Relaxed);
    let Some(remaining) = current.checked_sub(amount) else {
        panic!("negative gas consumed: {descriptor}");
    };
    consumed.store(remaining, Ordering::Relaxed);
}

/// A meter with a fixed limit.
#[derive(Debug)]
pub struct BasicGasMeter {
    limit: Gas,
    consumed: AtomicU64,
}

impl BasicGasMeter {
    pub fn new(limit: Gas) -> BasicGasMeter {
        BasicGasMeter {
            limit,
            consumed: AtomicU64::new(0),
        }
    }
}

impl GasMeter for BasicGasMeter {
    fn gas_consumed(&self) -> Gas {
        self.consumed.load(Ordering::Relaxed)
    }

    fn gas_consumed_to_limit(&self) -> Gas {
        self.gas_consumed().min(self.limit)
    }

    fn gas_remaining(&self) -> Gas {
        self.limit.saturating_sub(self.gas_consumed())
    }

    fn limit(&self) -> Gas {
        self.limit
    }

    fn consume_gas(&self, amount: Gas, descriptor: &str) {
        let total = add_or_overflow(&self.consumed, amount, descriptor);
        if total > self.limit {
            panic::panic_any(OutOfGas {
                descriptor: descriptor.to_owned(),
            });
        }
    }

    fn refund_gas(&self, amount: Gas, descriptor: &str) {
        refund(&self.consumed, amount, descriptor);
    }

    fn is_past_limit(&self) -> bool {
        self.gas_consumed() > self.limit
    }

    fn is_out_of_gas(&self) -> bool {
        self.gas_consumed() >= self.limit
    }
}

/// A meter which only counts.
#[derive(Debug, Default)]
pub struct InfiniteGasMeter {
    consumed: AtomicU64,
}

impl InfiniteGasMeter {
    pub fn new() -> InfiniteGasMeter {
        InfiniteGasMeter::default()
    }
}

impl GasMeter for InfiniteGasMeter {
    fn gas_consumed(&self) -> Gas {
        self.consumed.load(Ordering::Relaxed)
    }

    fn gas_consumed_to_limit(&self) -> Gas {
        self.gas_consumed()
    }

    fn gas_remaining(&self) -> Gas {
        Gas::MAX
    }

    fn limit(&self) -> Gas {
        Gas::MAX
    }

    fn consume_gas(&self, amount: Gas, descriptor: &str) {
        add_or_overflow(&self.consumed, amount, descriptor);
    }

    fn refund_gas(&self, amount: Gas, descriptor: &str) {
        refund(&self.consumed, amount, descriptor);
    }

    fn is_past_limit(&self) -> bool {
        false
    }

    fn is_out_of_gas(&self) -> bool {
        false
    }
}

/// Gas charged for each KV store access.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GasConfig {
    pub has: Gas,
    pub delete: Gas,
    pub read_flat: Gas,
    pub read_per_byte: Gas,
    pub write_flat: Gas,
    pub write_per_byte: Gas,
    pub iter_next_flat: Gas,
}

impl GasConfig {
    /// The host's schedule for persistent stores.
    pub const fn kv_default() -> GasConfig {
        GasConfig {
            has: 1000,
            delete: 1000,
            read_flat: 1000,
            read_per_byte: 3,
            write_flat: 2000,
            write_per_byte: 30,
            iter_next_flat: 30,
        }
    }

    /// The host's schedule for transient stores.
    pub const fn transient_default() -> GasConfig {
        GasConfig {
            has: 100,
            delete: 100,
            read_flat: 100,
            read_per_byte: 0,
            write_flat: 200,
            write_per_byte: 3,
            iter_next_flat: 3,
        }
    }

    pub const fn zero() -> GasConfig {
        GasConfig {
            has: 0,
            delete: 0,
            read_flat: 0,
            read_per_byte: 0,
            write_flat: 0,
            write_per_byte: 0,
            iter_next_flat: 0,
        }
    }
}

static SILENCE_OUT_OF_GAS: Once = Once::new();

/// Wraps the current panic hook so that [OutOfGas] panics are not reported. Every other panic still is.
fn silence_out_of_gas_panics() {
    SILENCE_OUT_OF_GAS.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<OutOfGas>().is_none() {
                previous(info);
            }
        }));
    });
}

/// Runs `f`, converting an [OutOfGas] panic into an error. Any other panic is resumed.
pub fn catch_out_of_gas<T>(f: impl FnOnce() -> T) -> Result<T, OutOfGas> {
    silence_out_of_gas_panics();
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<OutOfGas>() {
            Ok(oog) => Err(*oog),
            Err(other) => panic::resume_unwind(other),
        },
    }
}
