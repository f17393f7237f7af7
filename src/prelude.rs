//! # litcloak Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the litcloak library. Import this module to get quick access to everything needed
//! to build sequences, obfuscate them and inspect the outcome.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all litcloak operations
pub use crate::Error;

/// The result type used throughout litcloak
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Single-sequence entry points
pub use crate::obfuscation::{obfuscate, verify, ObfuscationOutput};

/// Engine and its configuration
pub use crate::obfuscation::{FailureAction, ObfuscationEngine, Policy};

/// Per-site and per-sequence outcomes
pub use crate::obfuscation::{ObfuscationReport, SiteOutcome, SiteStatus};

// ================================================================================================
// Instruction Model
// ================================================================================================

/// Instructions and their classification
pub use crate::assembly::{
    CallTarget, Immediate, Instruction, InstructionCategory, Intrinsic, Opcode, Operand,
    SlotType, StackBehavior,
};

/// Sequences and their construction
pub use crate::assembly::{ExceptionHandler, InstructionSequence, SequenceBuilder, SequenceId};

/// Initialization-time data required by rewritten code
pub use crate::assembly::{AuxId, AuxiliaryData, CellWidth};

// ================================================================================================
// Analysis and Evaluation
// ================================================================================================

/// Static stack analysis
pub use crate::analysis::{StackAnalyzer, StackEffect};

/// Concrete evaluation
pub use crate::emulation::{EmValue, StackMachine};

// ================================================================================================
// Strategies
// ================================================================================================

/// Strategy abstraction and registry
pub use crate::strategy::{ConstantStrategy, Expansion, StrategyContext, StrategyKind, StrategyPool};
