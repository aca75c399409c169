//! Numeric boundary between 18-decimal EVM values and the native fee denom.

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use alloy::primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::error::EvmError;

/// Decimals of every EVM-side value.
pub const EVM_DECIMALS: u8 = 18;

/// Precision of [Dec].
pub const DEC_PRECISION: usize = 18;

fn ten_pow(exp: u8) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

/// The chain's single fee denom and its relationship to wei.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinInfo {
    /// Denom of native `Coin` amounts, e.g. `uatom`.
    pub base_denom: String,
    /// Denom of the 18-decimal representation, e.g. `aatom`. Equal to `base_denom` when `decimals` is 18.
    pub extended_denom: String,
    pub decimals: u8,
}

impl CoinInfo {
    pub fn validate(&self) -> Result<(), EvmError> {
        if self.base_denom.is_empty() {
            return Err(EvmError::InvalidChainConfig("empty base denom".to_owned()));
        }
        if self.extended_denom.is_empty() {
            return Err(EvmError::InvalidChainConfig("empty extended denom".to_owned()));
        }
        if self.decimals == 0 || self.decimals > EVM_DECIMALS {
            return Err(EvmError::InvalidChainConfig(format!(
                "decimals must be between 1 and 18, got {}",
                self.decimals
            )));
        }
        match (self.decimals == EVM_DECIMALS, self.base_denom == self.extended_denom) {
            (true, false) => {
                return Err(EvmError::InvalidChainConfig(
                    "an 18 decimal denom has no separate extended denom".to_owned(),
                ));
            }
            (false, true) => {
                return Err(EvmError::InvalidChainConfig(format!(
                    "a {} decimal denom needs a separate extended denom",
                    self.decimals
                )));
            }
            _ => {}
        }
        Ok(())
    }

    /// `10^(18 - decimals)`: the number of wei in one native unit.
    pub fn conversion_factor(&self) -> U256 {
        ten_pow(EVM_DECIMALS - self.decimals)
    }

    /// Converts wei to native units, truncating toward zero.
    pub fn wei_to_native(&self, wei: U256) -> U256 {
        wei / self.conversion_factor()
    }

    /// Converts native units to wei. This is exact, but can overflow.
    pub fn native_to_wei(&self, native: U256) -> Result<U256, EvmError> {
        native
            .checked_mul(self.conversion_factor())
            .ok_or_else(|| EvmError::InvalidAmount(format!("{native} overflows as wei")))
    }

    /// Splits a wei amount into its native integer part and the sub-native remainder.
    pub fn split_wei(&self, wei: U256) -> (U256, U256) {
        let cf = self.conversion_factor();
        (wei / cf, wei % cf)
    }

    pub fn native_coin(&self, amount: U256) -> Coin {
        Coin::new(&self.base_denom, amount)
    }
}

/// An amount of a single denom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: U256,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: U256) -> Coin {
        Coin {
            denom: denom.into(),
            amount,
        }
    }

    pub fn zero(denom: impl Into<String>) -> Coin {
        Coin::new(denom, U256::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }
}

impl Display for Coin {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// A non-negative fixed point decimal with 18 digits of precision. Used for prices which can be fractional in the
/// native denom, such as the fee market's base fee and minimum gas price.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dec(U256);

impl Dec {
    pub const ZERO: Dec = Dec(U256::ZERO);

    fn one_raw() -> U256 {
        ten_pow(DEC_PRECISION as u8)
    }

    pub fn from_raw(raw: U256) -> Dec {
        Dec(raw)
    }

    pub fn raw(self) -> U256 {
        self.0
    }

    pub fn from_int(value: U256) -> Option<Dec> {
        value.checked_mul(Self::one_raw()).map(Dec)
    }

    pub fn from_u64(value: u64) -> Dec {
        // 2^64 * 10^18 always fits in 256 bits.
        Dec(U256::from(value) * Self::one_raw())
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_mul_int(self, value: U256) -> Option<Dec> {
        self.0.checked_mul(value).map(Dec)
    }

    /// The integer part, rounded toward zero.
    pub fn truncate_int(self) -> U256 {
        self.0 / Self::one_raw()
    }

    /// The integer part, rounded up.
    pub fn ceil_int(self) -> U256 {
        let one = Self::one_raw();
        let int = self.0 / one;
        if (self.0 % one).is_zero() {
            int
        } else {
            int + U256::from(1)
        }
    }
}

impl Display for Dec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let one = Self::one_raw();
        let int = self.0 / one;
        let frac = (self.0 % one).to_string();
        write!(f, "{int}.{frac:0>18}")
    }
}

impl FromStr for Dec {
    type Err = EvmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EvmError::InvalidAmount(format!("invalid decimal: {s:?}"));
        let (int, frac) = s.split_once('.').unwrap_or((s, ""));
        if int.is_empty() || frac.len() > DEC_PRECISION {
            return Err(invalid());
        }
        if !int.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let int = U256::from_str_radix(int, 10).map_err(|_| invalid())?;
        let frac = if frac.is_empty() {
            U256::ZERO
        } else {
            let padded = format!("{frac:0<18}");
            U256::from_str_radix(&padded, 10).map_err(|_| invalid())?
        };
        int.checked_mul(Self::one_raw())
            .and_then(|v| v.checked_add(frac))
            .map(Dec)
            .ok_or_else(invalid)
    }
}

impl Serialize for Dec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Dec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
