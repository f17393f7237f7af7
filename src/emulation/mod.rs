//! Concrete stack-machine simulator.
//!
//! The verifier does not trust static reasoning alone: every candidate replacement is
//! executed here, in isolation, and its result compared with the literal it replaces.
//!
//! # Components
//!
//! - [`StackMachine`] - Executes straight-line code seeded only by auxiliary declarations
//! - [`EvaluationStack`] - Bounded LIFO of [`EmValue`]s
//! - [`EmValue`] - Concrete slot values with wrapping integer semantics
//! - [`EmulationError`] - Why an instruction could not be evaluated

mod error;
mod machine;
mod stack;
mod value;

pub use error::EmulationError;
pub use machine::StackMachine;
pub use stack::EvaluationStack;
pub use value::{BinaryOp, ConversionType, EmValue, UnaryOp};
