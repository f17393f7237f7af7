//! Evaluation stack with overflow protection.
//!
//! [`EvaluationStack`] is the working area of the [`crate::emulation::StackMachine`]. It is a
//! plain last-in-first-out stack of [`EmValue`]s with a maximum depth, so a runaway sequence
//! fails with [`EmulationError::StackOverflow`] instead of consuming memory.
//!
//! # Type-Checked Operations
//!
//! While [`push`](EvaluationStack::push) accepts any [`EmValue`], the typed pop methods
//! ([`pop_i32`](EvaluationStack::pop_i32), [`pop_i64`](EvaluationStack::pop_i64)) leave the
//! value in place and report a type mismatch if the top slot has a different type.

use crate::emulation::{EmValue, EmulationError};

/// Evaluation stack with a maximum depth.
///
/// # Example
///
/// ```rust
/// use litcloak::emulation::{EmValue, EvaluationStack};
///
/// let mut stack = EvaluationStack::new(2);
/// stack.push(EmValue::I32(1))?;
/// stack.push(EmValue::I64(2))?;
/// assert!(stack.push(EmValue::I32(3)).is_err());
///
/// assert!(stack.pop_i32().is_err());
/// assert_eq!(stack.pop_i64()?, 2);
/// # Ok::<(), litcloak::emulation::EmulationError>(())
/// ```
#[derive(Clone, Debug)]
pub struct EvaluationStack {
    /// The stack storage.
    values: Vec<EmValue>,

    /// Maximum allowed stack depth.
    max_depth: usize,
}

impl EvaluationStack {
    /// Creates a new evaluation stack with the given maximum depth.
    #[must_use]
    pub fn new(max_depth: usize) -> Self {
        EvaluationStack {
            values: Vec::with_capacity(max_depth.min(64)),
            max_depth,
        }
    }

    /// Pushes a value onto the stack.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::StackOverflow`] if the stack is full.
    pub fn push(&mut self, value: EmValue) -> Result<(), EmulationError> {
        if self.values.len() >= self.max_depth {
            return Err(EmulationError::StackOverflow);
        }
        self.values.push(value);
        Ok(())
    }

    /// Pops a value from the stack.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::StackUnderflow`] if the stack is empty.
    pub fn pop(&mut self) -> Result<EmValue, EmulationError> {
        self.values.pop().ok_or(EmulationError::StackUnderflow)
    }

    /// Peeks at the top value without removing it.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::StackUnderflow`] if the stack is empty.
    pub fn peek(&self) -> Result<&EmValue, EmulationError> {
        self.values.last().ok_or(EmulationError::StackUnderflow)
    }

    /// Pops an `int32` value from the stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack is empty or the top value is not `int32`.
    pub fn pop_i32(&mut self) -> Result<i32, EmulationError> {
        match self.pop()? {
            EmValue::I32(v) => Ok(v),
            other => {
                let found = other.type_name();
                self.values.push(other);
                Err(EmulationError::StackTypeMismatch {
                    expected: "int32",
                    found,
                })
            }
        }
    }

    /// Pops an `int64` value from the stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack is empty or the top value is not `int64`.
    pub fn pop_i64(&mut self) -> Result<i64, EmulationError> {
        match self.pop()? {
            EmValue::I64(v) => Ok(v),
            other => {
                let found = other.type_name();
                self.values.push(other);
                Err(EmulationError::StackTypeMismatch {
                    expected: "int64",
                    found,
                })
            }
        }
    }

    /// Pops two values, returning them in push order.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::StackUnderflow`] if fewer than two values are present.
    pub fn pop_pair(&mut self) -> Result<(EmValue, EmValue), EmulationError> {
        if self.values.len() < 2 {
            return Err(EmulationError::StackUnderflow);
        }
        let right = self.pop()?;
        let left = self.pop()?;
        Ok((left, right))
    }

    /// Current depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the stack is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Stack contents, bottom first.
    #[must_use]
    pub fn values(&self) -> &[EmValue] {
        &self.values
    }

    /// Removes every value.
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl Default for EvaluationStack {
    fn default() -> Self {
        Self::new(1024)
    }
}
