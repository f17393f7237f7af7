//! Evaluation error types.
//!
//! [`EmulationError`] describes why the simulator could not evaluate an instruction. It
//! carries no position; [`crate::emulation::StackMachine`] attaches the failing position when
//! converting it into a crate-level [`crate::Error`].

use std::fmt;

use crate::assembly::{AuxId, CellWidth};

/// Errors that can occur while evaluating straight-line code.
#[derive(Debug, Clone, PartialEq)]
pub enum EmulationError {
    /// Evaluation stack overflow.
    StackOverflow,
    /// Evaluation stack underflow (pop from empty stack).
    StackUnderflow,
    /// Stack type mismatch during operation.
    StackTypeMismatch {
        /// Expected type.
        expected: &'static str,
        /// Actual type found.
        found: &'static str,
    },
    /// Byte table index out of bounds.
    ArrayIndexOutOfBounds {
        /// The requested index.
        index: i64,
        /// Length of the table.
        length: usize,
    },
    /// A load referenced an auxiliary declaration that does not exist or has another kind.
    UnknownAuxiliary(AuxId),
    /// An indirect read used a different width than the cell was written with.
    WidthMismatch {
        /// Width of the read.
        read: CellWidth,
        /// Width the cell was declared with.
        declared: CellWidth,
    },
    /// A local variable was read before being written.
    UninitializedLocal(u16),
    /// The instruction cannot be evaluated in isolation (branches, opaque code, calls to
    /// unknown methods).
    UnsupportedInstruction(&'static str),
}

impl fmt::Display for EmulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulationError::StackOverflow => write!(f, "evaluation stack overflow"),
            EmulationError::StackUnderflow => write!(f, "evaluation stack underflow"),
            EmulationError::StackTypeMismatch { expected, found } => {
                write!(f, "stack type mismatch: expected {expected}, found {found}")
            }
            EmulationError::ArrayIndexOutOfBounds { index, length } => {
                write!(f, "table index {index} out of bounds (length: {length})")
            }
            EmulationError::UnknownAuxiliary(id) => write!(f, "unknown auxiliary data {id}"),
            EmulationError::WidthMismatch { read, declared } => write!(
                f,
                "{}-byte read from a {}-byte cell",
                read.bytes(),
                declared.bytes()
            ),
            EmulationError::UninitializedLocal(index) => {
                write!(f, "local V_{index} read before assignment")
            }
            EmulationError::UnsupportedInstruction(mnemonic) => {
                write!(f, "'{mnemonic}' cannot be evaluated in straight-line code")
            }
        }
    }
}

impl std::error::Error for EmulationError {}
