// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # litcloak
//!
//! Constant obfuscation for stack-machine bytecode. `litcloak` locates loads of small integer
//! literals in an instruction sequence and replaces each one with a short, semantically
//! equivalent instruction sequence whose individual terms do not reveal the original value
//! without executing it.
//!
//! ## Features
//!
//! - **Container independent** - Works on an abstract instruction model; decoding and
//!   encoding of concrete class or module formats are left to the caller
//! - **Seven reconstruction strategies** - Bitwise composition, shift reconstruction, length
//!   offsets, min/max chains, byte splitting, indirect memory loads and byte reversal
//! - **Nested composition** - Literal operands of one strategy are themselves obfuscated by
//!   another, up to a configurable depth
//! - **Verified rewrites** - Every replacement is stack-checked and evaluated before it is
//!   spliced; failed plans are retried with different strategies
//! - **Reproducible** - All randomness flows from a seed, so runs are bit-identical
//! - **Parallel** - Independent sequences are processed on a rayon pool
//!
//! ## Quick Start
//!
//! ```rust
//! use litcloak::prelude::*;
//!
//! let mut builder = SequenceBuilder::new("Config::port");
//! builder.push_int(9999)?.ret_value()?;
//! let sequence = builder.build()?;
//!
//! let policy = Policy::default().with_seed(7).with_max_nesting_depth(2);
//! let output = obfuscate(&sequence, &policy)?;
//!
//! // The literal no longer appears as an immediate
//! assert!(output
//!     .sequence
//!     .instructions()
//!     .iter()
//!     .all(|instr| instr.int_literal() != Some(9999)));
//!
//! // And the result still computes the same value
//! verify(&sequence, &output.sequence)?;
//! # Ok::<(), litcloak::Error>(())
//! ```
//!
//! ## Architecture
//!
//! The crate is organized leaf-first:
//!
//! - [`assembly`] - Instruction model, sequences, splicing and auxiliary declarations
//! - [`analysis`] - Static stack-effect analysis
//! - [`emulation`] - Concrete evaluation of straight-line code
//! - [`strategy`] - The pool of reconstruction strategies
//! - [`obfuscation`] - Strategy selection, the rewrite engine and verification
//!
//! ### Auxiliary Data
//!
//! Byte-split and indirect-memory strategies need data that exists before the rewritten code
//! runs. These requirements are returned as [`assembly::AuxiliaryData`] declarations on the
//! rewritten sequence, for the container encoder to place into static initializers.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`]. Recoverable per-attempt failures are retried inside
//! the engine; strategy defects and exhausted retry budgets are reported with the site
//! position, strategy and expected value. See [`Error`] for the full taxonomy.

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust
/// use litcloak::prelude::*;
///
/// let sequence = InstructionSequence::new("noop", vec![Instruction::simple(Opcode::Return)?])?;
/// let output = obfuscate(&sequence, &Policy::default())?;
/// assert_eq!(output.report.rewritten_count(), 0);
/// # Ok::<(), litcloak::Error>(())
/// ```
pub mod prelude;

/// Instruction model: opcodes, operands, sequences and splicing.
pub mod assembly;

/// Static stack-effect analysis of instructions and sequences.
pub mod analysis;

/// Concrete stack-machine simulator used to verify rewrites.
pub mod emulation;

/// Reconstruction strategies and the strategy pool.
pub mod strategy;

/// Strategy selection, the rewrite engine, verification and reporting.
pub mod obfuscation;

/// `litcloak` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `litcloak` Error type
///
/// The main error type for all operations in this crate.
pub use error::Error;

pub use obfuscation::{obfuscate, verify, ObfuscationOutput, Policy};
