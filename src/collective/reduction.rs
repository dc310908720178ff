//! Reduction Operator Registry
//!
//! Maps the closed set of operator names to `ReduceOp` and defines how each
//! operator folds concrete operand types. Names resolve once, when a reducer
//! is configured, so a typo fails at setup instead of in the middle of a run.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Prod,
    Max,
    Min,
    /// Logical and
    Land,
    /// Bitwise and
    Band,
    Lor,
    Bor,
    Lxor,
    Bxor,
    /// Largest value together with the index that holds it.
    MaxLoc,
    MinLoc,
}

impl ReduceOp {
    pub const ALL: [ReduceOp; 12] = [
        ReduceOp::Sum,
        ReduceOp::Prod,
        ReduceOp::Max,
        ReduceOp::Min,
        ReduceOp::Land,
        ReduceOp::Band,
        ReduceOp::Lor,
        ReduceOp::Bor,
        ReduceOp::Lxor,
        ReduceOp::Bxor,
        ReduceOp::MaxLoc,
        ReduceOp::MinLoc,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Prod => "prod",
            ReduceOp::Max => "max",
            ReduceOp::Min => "min",
            ReduceOp::Land => "land",
            ReduceOp::Band => "band",
            ReduceOp::Lor => "lor",
            ReduceOp::Bor => "bor",
            ReduceOp::Lxor => "lxor",
            ReduceOp::Bxor => "bxor",
            ReduceOp::MaxLoc => "maxloc",
            ReduceOp::MinLoc => "minloc",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(ReduceOp::name).collect()
    }

    /// Case-insensitive lookup of a symbolic operator name.
    pub fn resolve(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::UnknownReductionOperator {
                name: name.to_string(),
                valid: Self::names().join(", "),
            })
    }

    /// Folds `values` left to right, i.e. in rank order for collective input.
    pub fn fold<T: Reducible>(self, values: Vec<T>) -> Result<T> {
        let mut values = values.into_iter();
        let first = values
            .next()
            .ok_or_else(|| Error::Protocol(format!("{} over an empty set of values", self)))?;
        values.try_fold(first, |acc, value| acc.combine(value, self))
    }
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReduceOp {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        Self::resolve(name)
    }
}

/// Operand types a `ReduceOp` can fold.
pub trait Reducible: Sized {
    fn combine(self, other: Self, op: ReduceOp) -> Result<Self>;
}

fn unsupported(op: ReduceOp, operand: &str) -> Error {
    Error::UnsupportedReduction {
        op: op.name().to_string(),
        operand: operand.to_string(),
    }
}

// Fixed-width integers wrap on overflow, like the C integer reductions.
macro_rules! impl_reducible_int {
    ($($t:ty),*) => {$(
        impl Reducible for $t {
            fn combine(self, other: Self, op: ReduceOp) -> Result<Self> {
                Ok(match op {
                    ReduceOp::Sum => self.wrapping_add(other),
                    ReduceOp::Prod => self.wrapping_mul(other),
                    ReduceOp::Max => self.max(other),
                    ReduceOp::Min => self.min(other),
                    ReduceOp::Land => ((self != 0) && (other != 0)) as $t,
                    ReduceOp::Lor => ((self != 0) || (other != 0)) as $t,
                    ReduceOp::Lxor => ((self != 0) != (other != 0)) as $t,
                    ReduceOp::Band => self & other,
                    ReduceOp::Bor => self | other,
                    ReduceOp::Bxor => self ^ other,
                    ReduceOp::MaxLoc | ReduceOp::MinLoc => {
                        return Err(unsupported(op, stringify!($t)));
                    }
                })
            }
        }
    )*};
}

impl_reducible_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

macro_rules! impl_reducible_float {
    ($($t:ty),*) => {$(
        impl Reducible for $t {
            fn combine(self, other: Self, op: ReduceOp) -> Result<Self> {
                match op {
                    ReduceOp::Sum => Ok(self + other),
                    ReduceOp::Prod => Ok(self * other),
                    ReduceOp::Max => Ok(self.max(other)),
                    ReduceOp::Min => Ok(self.min(other)),
                    _ => Err(unsupported(op, stringify!($t))),
                }
            }
        }
    )*};
}

impl_reducible_float!(f32, f64);

impl Reducible for bool {
    fn combine(self, other: Self, op: ReduceOp) -> Result<Self> {
        match op {
            ReduceOp::Land | ReduceOp::Band | ReduceOp::Min => Ok(self && other),
            ReduceOp::Lor | ReduceOp::Bor | ReduceOp::Max => Ok(self || other),
            ReduceOp::Lxor | ReduceOp::Bxor => Ok(self != other),
            _ => Err(unsupported(op, "bool")),
        }
    }
}

/// A value paired with the index it came from, the operand of `maxloc`/`minloc`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Loc<T> {
    pub value: T,
    pub index: usize,
}

impl<T> Loc<T> {
    pub fn new(value: T, index: usize) -> Self {
        Self { value, index }
    }
}

impl<T: PartialOrd> Reducible for Loc<T> {
    /// Ties keep the lower index.
    fn combine(self, other: Self, op: ReduceOp) -> Result<Self> {
        let other_wins = match op {
            ReduceOp::MaxLoc => other.value > self.value,
            ReduceOp::MinLoc => other.value < self.value,
            _ => return Err(unsupported(op, "Loc pairs")),
        };
        let tie = other.value == self.value && other.index < self.index;

        Ok(if other_wins || tie { other } else { self })
    }
}

/// Element-wise reduction of equal-length vectors.
impl<T: Reducible> Reducible for Vec<T> {
    fn combine(self, other: Self, op: ReduceOp) -> Result<Self> {
        if self.len() != other.len() {
            return Err(Error::LengthMismatch {
                operation: "element-wise reduction",
                expected: self.len(),
                actual: other.len(),
            });
        }

        self.into_iter()
            .zip(other)
            .map(|(left, right)| left.combine(right, op))
            .collect()
    }
}
