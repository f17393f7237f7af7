//! Concrete values and the operations defined on them.
//!
//! [`EmValue`] is what occupies one slot of the simulator's evaluation stack. Integer
//! arithmetic wraps on overflow, shift amounts are masked to the operand width, and narrowing
//! conversions truncate and sign-extend.
//!
//! # Examples
//!
//! ```rust
//! use litcloak::emulation::{BinaryOp, EmValue, UnaryOp};
//!
//! let not = EmValue::I32(-27282).unary_op(UnaryOp::Not)?;
//! assert_eq!(not, EmValue::I32(27281));
//!
//! let masks = EmValue::I32(0x4C94).binary_op(&EmValue::I32(0x418E), BinaryOp::Or)?;
//! let result = not.binary_op(&masks, BinaryOp::Xor)?;
//! assert_eq!(result, EmValue::I32(9999));
//! # Ok::<(), litcloak::emulation::EmulationError>(())
//! ```

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_lossless
)]

use std::fmt;

use crate::{
    assembly::{AuxId, SlotType},
    emulation::EmulationError,
};

/// A value on the simulator's evaluation stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmValue {
    /// 32-bit integer
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// String constant
    Str(String),
    /// Reference to a byte table, with its contents
    ByteArray(Vec<i8>),
    /// Opaque handle to a native memory cell
    Handle(AuxId),
}

impl EmValue {
    /// Static slot type of this value.
    #[must_use]
    pub fn slot_type(&self) -> SlotType {
        match self {
            EmValue::I32(_) => SlotType::Int,
            EmValue::I64(_) | EmValue::Handle(_) => SlotType::Long,
            EmValue::Str(_) | EmValue::ByteArray(_) => SlotType::Reference,
        }
    }

    /// Short type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            EmValue::I32(_) => "int32",
            EmValue::I64(_) => "int64",
            EmValue::Str(_) => "string",
            EmValue::ByteArray(_) => "byte[]",
            EmValue::Handle(_) => "handle",
        }
    }

    /// Returns the value as a sign-extended integer, if it is one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            EmValue::I32(v) => Some(i64::from(*v)),
            EmValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    fn mismatch(&self, expected: &'static str) -> EmulationError {
        EmulationError::StackTypeMismatch {
            expected,
            found: self.type_name(),
        }
    }

    /// Performs a binary operation with `self` as the left operand.
    ///
    /// Both operands must be `int32`, or both `int64`; shifts take an `int32` amount for
    /// either width.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::StackTypeMismatch`] for any other combination.
    pub fn binary_op(&self, other: &Self, op: BinaryOp) -> Result<Self, EmulationError> {
        match (self, other) {
            (EmValue::I32(a), EmValue::I32(b)) => {
                let (a, b) = (*a, *b);
                Ok(EmValue::I32(match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    BinaryOp::And => a & b,
                    BinaryOp::Or => a | b,
                    BinaryOp::Xor => a ^ b,
                    BinaryOp::Shl => a.wrapping_shl(b as u32 & 31),
                    BinaryOp::Shr => a.wrapping_shr(b as u32 & 31),
                    BinaryOp::ShrUn => ((a as u32) >> (b as u32 & 31)) as i32,
                }))
            }
            (EmValue::I64(a), EmValue::I32(b)) if op.is_shift() => {
                let (a, amount) = (*a, *b as u32 & 63);
                Ok(EmValue::I64(match op {
                    BinaryOp::Shl => a.wrapping_shl(amount),
                    BinaryOp::Shr => a.wrapping_shr(amount),
                    _ => ((a as u64) >> amount) as i64,
                }))
            }
            (EmValue::I64(a), EmValue::I64(b)) if !op.is_shift() => {
                let (a, b) = (*a, *b);
                Ok(EmValue::I64(match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    BinaryOp::And => a & b,
                    BinaryOp::Or => a | b,
                    _ => a ^ b,
                }))
            }
            (EmValue::I64(_), _) => Err(other.mismatch(if op.is_shift() { "int32" } else { "int64" })),
            (EmValue::I32(_), _) => Err(other.mismatch("int32")),
            _ => Err(self.mismatch("int32 or int64")),
        }
    }

    /// Performs a unary operation on an `int32`.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::StackTypeMismatch`] for non-`int32` values.
    pub fn unary_op(&self, op: UnaryOp) -> Result<Self, EmulationError> {
        match self {
            EmValue::I32(v) => Ok(EmValue::I32(match op {
                UnaryOp::Neg => v.wrapping_neg(),
                UnaryOp::Not => !v,
            })),
            _ => Err(self.mismatch("int32")),
        }
    }

    /// Converts between integer widths.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::StackTypeMismatch`] if the source has the wrong type.
    pub fn convert(&self, conversion: ConversionType) -> Result<Self, EmulationError> {
        match (conversion, self) {
            (ConversionType::I2L, EmValue::I32(v)) => Ok(EmValue::I64(i64::from(*v))),
            (ConversionType::L2I, EmValue::I64(v)) => Ok(EmValue::I32(*v as i32)),
            (ConversionType::I2S, EmValue::I32(v)) => Ok(EmValue::I32(i32::from(*v as i16))),
            (ConversionType::I2B, EmValue::I32(v)) => Ok(EmValue::I32(i32::from(*v as i8))),
            (ConversionType::L2I, _) => Err(self.mismatch("int64")),
            _ => Err(self.mismatch("int32")),
        }
    }
}

impl fmt::Display for EmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmValue::I32(v) => write!(f, "{v}"),
            EmValue::I64(v) => write!(f, "{v}L"),
            EmValue::Str(s) => write!(f, "{s:?}"),
            EmValue::ByteArray(bytes) => write!(f, "byte[{}]", bytes.len()),
            EmValue::Handle(id) => write!(f, "handle({id})"),
        }
    }
}

/// Binary arithmetic, bitwise and shift operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Wrapping addition
    Add,
    /// Wrapping subtraction
    Sub,
    /// Wrapping multiplication
    Mul,
    /// Bitwise AND
    And,
    /// Bitwise OR
    Or,
    /// Bitwise XOR
    Xor,
    /// Shift left, amount masked to the width
    Shl,
    /// Arithmetic shift right
    Shr,
    /// Logical shift right
    ShrUn,
}

impl BinaryOp {
    /// Returns `true` for the three shift operations.
    #[must_use]
    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::ShrUn)
    }
}

/// Unary integer operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Two's complement negation
    Neg,
    /// Bitwise complement
    Not,
}

/// Integer width conversions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConversionType {
    /// Sign-extend `int32` to `int64`
    I2L,
    /// Truncate `int64` to `int32`
    L2I,
    /// Truncate to 16 bits and sign-extend
    I2S,
    /// Truncate to 8 bits and sign-extend
    I2B,
}
