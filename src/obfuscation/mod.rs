//! Strategy selection, the rewrite engine and verification.
//!
//! This module ties the other layers together. The [`StrategySelector`] composes strategies
//! from the [`crate::strategy::StrategyPool`] into [`RewritePlan`] trees, the
//! [`ObfuscationEngine`] applies accepted plans to an
//! [`crate::assembly::InstructionSequence`], and [`verify`] independently confirms that a
//! rewritten sequence is equivalent to its original.
//!
//! # Architecture
//!
//! ```text
//! InstructionSequence
//!        |
//!        v
//! ObfuscationEngine ---- per site ----> StrategySelector --> RewritePlan
//!        |                                                       |
//!        |                          StackAnalyzer, leak and size checks, StackMachine
//!        |                                                       |
//!        +<-------------- splice + region + auxiliary <----------+
//!        |
//!        v
//! ObfuscationOutput { sequence, report }
//! ```
//!
//! # Key Components
//!
//! - [`Policy`] - Depth, allowed strategies, retry budget, seed and failure behavior
//! - [`ObfuscationEngine`] - Processes one sequence or many in parallel
//! - [`ObfuscationReport`] - What happened at every site
//! - [`verify`] - Structural and concrete equivalence check
//!
//! # Usage Examples
//!
//! ```rust
//! use litcloak::obfuscation::{ObfuscationEngine, Policy};
//! use litcloak::assembly::SequenceBuilder;
//!
//! let mut a = SequenceBuilder::new("a");
//! a.push_int(1)?.ret_value()?;
//! let mut b = SequenceBuilder::new("b");
//! b.push_int(2)?.ret_value()?;
//!
//! let engine = ObfuscationEngine::new(Policy::default().with_seed(42))?;
//! let outputs = engine.obfuscate_all(&[a.build()?, b.build()?])?;
//! assert_eq!(outputs.len(), 2);
//! # Ok::<(), litcloak::Error>(())
//! ```

mod engine;
mod plan;
mod policy;
mod report;
mod selector;
mod verifier;

pub use engine::{obfuscate, ObfuscationEngine, ObfuscationOutput, ObfuscationSite};
pub use plan::{PlanNode, PlanPart, RewritePlan};
pub use policy::{FailureAction, Policy};
pub use report::{ObfuscationReport, SiteOutcome, SiteStatus};
pub use selector::StrategySelector;
pub use verifier::verify;
