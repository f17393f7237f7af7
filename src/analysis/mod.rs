//! Static analysis of instruction sequences.
//!
//! The analyses in this module never execute code. They derive everything from the
//! per-instruction stack effects declared by [`crate::assembly::Instruction`], which makes
//! them cheap enough to run on every candidate replacement the strategy selector produces.
//!
//! # Architecture
//!
//! - [`StackAnalyzer`] - Depth and slot-type tracking for blocks and whole sequences
//! - [`StackEffect`] - The `(popped, pushed)` summary of a straight-line run
//! - [`StackState`] - Abstract operand stack used during analysis
//!
//! # Usage
//!
//! ```rust
//! use litcloak::analysis::StackEffect;
//! use litcloak::assembly::{Instruction, Intrinsic};
//!
//! let block = vec![
//!     Instruction::iconst(0x0F27),
//!     Instruction::intrinsic(Intrinsic::ReverseBytes16),
//! ];
//! let effect = StackEffect::of(&block);
//! assert_eq!((effect.popped, effect.pushed), (0, 1));
//! ```

mod stack;

pub use crate::assembly::SlotType;
pub use stack::{BlockAnalysis, SequenceAnalysis, StackAnalyzer, StackEffect, StackState};
