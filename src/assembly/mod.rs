//! Instruction model for stack-machine code.
//!
//! This module provides the in-memory representation the obfuscation engine works on,
//! abstracted away from any container format. A structural decoder supplies
//! [`InstructionSequence`] values; after rewriting, a structural encoder serializes them
//! together with their [`AuxiliaryData`] declarations.
//!
//! # Key Types
//! - [`Instruction`] - A validated opcode/operand pair with derived stack effect
//! - [`InstructionSequence`] - Ordered instructions plus branch targets, handler ranges,
//!   rewritten regions and auxiliary declarations
//! - [`SequenceBuilder`] - Label-based construction of sequences
//! - [`AuxiliaryData`] - Initialization-time data required by rewritten code
//!
//! # Example
//! ```rust
//! use litcloak::assembly::{Instruction, InstructionSequence, Opcode};
//!
//! let sequence = InstructionSequence::new(
//!     "const",
//!     vec![Instruction::iconst(7), Instruction::simple(Opcode::IReturn)?],
//! )?;
//! assert_eq!(sequence.len(), 2);
//! # Ok::<(), litcloak::Error>(())
//! ```

mod auxiliary;
mod builder;
mod instruction;
mod sequence;

pub use auxiliary::{AuxAllocator, AuxId, AuxiliaryData, CellWidth};
pub use builder::SequenceBuilder;
pub use instruction::{
    CallTarget, FlowType, Immediate, Instruction, InstructionCategory, Intrinsic, MethodRef,
    OpaqueEffect, Opcode, Operand, OperandType, SlotType, StackBehavior,
};
pub use sequence::{ExceptionHandler, InstructionSequence, RewrittenRegion, SequenceId};
