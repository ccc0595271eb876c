use ethers::types::{U256, U512};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::conversions::{parse_u256, u512_to_u256};
use crate::error::AllocationError;

/// Exact non-negative rational number, always kept in lowest terms.
///
/// Persisted as `"numerator/denominator"` (or just `"numerator"` when the
/// denominator is one), which keeps LP proportions lossless across cache runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fraction {
    numerator: U256,
    denominator: U256,
}

impl Fraction {
    pub fn new(numerator: U256, denominator: U256) -> Result<Self, AllocationError> {
        if denominator.is_zero() {
            return Err(AllocationError::ZeroDenominator);
        }
        let divisor = gcd(numerator, denominator);
        Ok(Self {
            numerator: numerator / divisor,
            denominator: denominator / divisor,
        })
    }

    pub fn from_integer(value: U256) -> Self {
        Self {
            numerator: value,
            denominator: U256::one(),
        }
    }

    pub fn numerator(&self) -> U256 {
        self.numerator
    }

    pub fn denominator(&self) -> U256 {
        self.denominator
    }

    pub fn is_zero(&self) -> bool {
        self.numerator.is_zero()
    }

    /// `floor(self * value)`, computed without intermediate precision loss.
    pub fn mul_floor(&self, value: U256) -> Result<U256, AllocationError> {
        let product: U512 = self.numerator.full_mul(value);
        u512_to_u256(product / U512::from(self.denominator))
            .map_err(|_| AllocationError::Overflow("fraction multiplication"))
    }
}

fn gcd(mut a: U256, mut b: U256) -> U256 {
    while !b.is_zero() {
        let r = a % b;
        a = b;
        b = r;
    }
    if a.is_zero() {
        U256::one()
    } else {
        a
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.numerator.full_mul(other.denominator);
        let rhs = other.numerator.full_mul(self.denominator);
        lhs.cmp(&rhs)
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == U256::one() {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

impl FromStr for Fraction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((numerator, denominator)) => Ok(Fraction::new(
                parse_u256(numerator)?,
                parse_u256(denominator)?,
            )?),
            None => Ok(Fraction::from_integer(parse_u256(s)?)),
        }
    }
}

impl TryFrom<String> for Fraction {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fraction> for String {
    fn from(value: Fraction) -> Self {
        value.to_string()
    }
}
