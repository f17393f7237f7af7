//! Reconstruction strategies for integer literals.
//!
//! A strategy turns one 16-bit target value into an instruction template that computes the
//! value at runtime. Templates are expressed as an [`Expansion`]: a list of [`Fragment`]s in
//! which every nestable operand is a [`Fragment::Literal`]. The selector may replace such a
//! literal with the expansion of another strategy, which is how strategies compose.
//!
//! # Built-in Strategies
//!
//! | Name | Reconstruction |
//! |---|---|
//! | `bitwise-composition` | `~X ^ (A \| B)` |
//! | `shift-reconstruction` | `(W >>> S)` narrowed to 16 bits |
//! | `length-offset` | `(target - len) + "…".length()` |
//! | `min-max-chain` | `min(max(a, b), max(c, d))` or its dual |
//! | `byte-split-reconstruction` | `(table[i] & 0xFF) << 8 \| (table[j] & 0xFF)` |
//! | `indirect-memory-load` | `read_i16(handle)` |
//! | `byte-reversal` | `reverse_bytes(swapped)` |
//!
//! # Contract
//!
//! Every expansion must, on an empty stack, push exactly one integer equal to the target and
//! nothing else. Strategies resample their free parameters so that no emitted immediate equals
//! the target; where the structure of a strategy forces such a literal, it is emitted as a
//! [`Fragment::Literal`] so the selector can nest it away. Strategies draw all randomness from
//! the [`StrategyContext`] and never touch global state.
//!
//! # Extending the Pool
//!
//! ```rust
//! use litcloak::assembly::{Instruction, Opcode};
//! use litcloak::strategy::{ConstantStrategy, Expansion, StrategyContext, StrategyPool};
//!
//! /// `(target - 1) + 1`
//! struct Increment;
//!
//! impl ConstantStrategy for Increment {
//!     fn name(&self) -> &'static str {
//!         "increment"
//!     }
//!
//!     fn expand(&self, target: i16, _ctx: &mut StrategyContext<'_>) -> litcloak::Result<Expansion> {
//!         let mut expansion = Expansion::new(self.name());
//!         expansion
//!             .literal(i32::from(target) - 1)
//!             .literal(1)
//!             .instruction(Instruction::simple(Opcode::IAdd)?);
//!         Ok(expansion)
//!     }
//! }
//!
//! let mut pool = StrategyPool::builtin();
//! pool.register(Increment);
//! assert!(pool.get("increment").is_some());
//! # Ok::<(), litcloak::Error>(())
//! ```

mod bitwise;
mod bytesplit;
mod indirect;
mod length;
mod minmax;
mod reverse;
mod shift;

use std::sync::Arc;

use rand::RngCore;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
    assembly::{AuxAllocator, AuxiliaryData, Instruction},
    Error, Result,
};

pub use bitwise::{BitwiseComposition, BitwiseParams};
pub use bytesplit::{ByteSplitParams, ByteSplitReconstruction};
pub use indirect::IndirectMemoryLoad;
pub use length::{LengthOffset, LengthParams};
pub use minmax::{ChainShape, MinMaxChain, MinMaxParams};
pub use reverse::{reverse16, ByteReversal};
pub use shift::{Carrier, ShiftParams, ShiftReconstruction};

/// Upper bound on resampling free parameters before a strategy gives up on a target.
pub(crate) const MAX_RESAMPLES: usize = 64;

/// Services available to a strategy while it expands a target.
pub struct StrategyContext<'a> {
    /// Source of all randomness
    pub rng: &'a mut dyn RngCore,
    /// Identifiers for auxiliary declarations
    pub aux: &'a mut AuxAllocator,
}

impl<'a> StrategyContext<'a> {
    /// Bundles a random source and an auxiliary allocator.
    pub fn new(rng: &'a mut dyn RngCore, aux: &'a mut AuxAllocator) -> Self {
        StrategyContext { rng, aux }
    }
}

/// One element of a strategy template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// A fixed instruction
    Instruction(Instruction),
    /// An integer operand; emitted as `iconst` unless the selector nests a rewrite in its place
    Literal(i32),
}

/// Instruction template produced by one strategy for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    strategy: String,
    fragments: Vec<Fragment>,
    auxiliary: Vec<AuxiliaryData>,
}

impl Expansion {
    /// Creates an empty expansion attributed to `strategy`.
    #[must_use]
    pub fn new(strategy: impl Into<String>) -> Self {
        Expansion {
            strategy: strategy.into(),
            fragments: Vec::new(),
            auxiliary: Vec::new(),
        }
    }

    /// Appends a fixed instruction.
    pub fn instruction(&mut self, instruction: Instruction) -> &mut Self {
        self.fragments.push(Fragment::Instruction(instruction));
        self
    }

    /// Appends a nestable integer operand.
    pub fn literal(&mut self, value: i32) -> &mut Self {
        self.fragments.push(Fragment::Literal(value));
        self
    }

    /// Attaches an auxiliary declaration the template depends on.
    pub fn auxiliary(&mut self, data: AuxiliaryData) -> &mut Self {
        self.auxiliary.push(data);
        self
    }

    /// Name of the producing strategy.
    #[must_use]
    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    /// The template.
    #[must_use]
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Auxiliary declarations of this template (not of nested ones).
    #[must_use]
    pub fn auxiliary_data(&self) -> &[AuxiliaryData] {
        &self.auxiliary
    }

    /// Splits the expansion into its parts.
    #[must_use]
    pub fn into_parts(self) -> (String, Vec<Fragment>, Vec<AuxiliaryData>) {
        (self.strategy, self.fragments, self.auxiliary)
    }

    /// The template with every literal emitted as `iconst`.
    #[must_use]
    pub fn instructions(&self) -> Vec<Instruction> {
        self.fragments
            .iter()
            .map(|fragment| match fragment {
                Fragment::Instruction(instr) => instr.clone(),
                Fragment::Literal(value) => Instruction::iconst(*value),
            })
            .collect()
    }
}

/// A named transformation from a target value to an equivalent instruction template.
///
/// Implementations must be stateless: every call to [`ConstantStrategy::expand`] depends only
/// on the target and the context.
pub trait ConstantStrategy: Send + Sync {
    /// Unique name used in policies, reports and logs.
    fn name(&self) -> &'static str;

    /// Short human-readable description.
    fn description(&self) -> &'static str {
        ""
    }

    /// Returns `true` if the expansion never has nestable operands.
    fn is_leaf(&self) -> bool {
        false
    }

    /// Returns `true` if the expansion always contains the target itself as an operand.
    ///
    /// Such strategies are never chosen to hide a literal that already equals the target.
    fn embeds_target(&self) -> bool {
        false
    }

    /// Produces a template computing `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedWidth`] if the target does not satisfy this strategy's
    /// preconditions, or [`Error::ImmediateLeak`] if no leak-free parameters were found.
    fn expand(&self, target: i16, ctx: &mut StrategyContext<'_>) -> Result<Expansion>;
}

/// The built-in strategies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum StrategyKind {
    /// `~X ^ (A | B)`
    BitwiseComposition,
    /// Unsigned shift of a wide carrier
    ShiftReconstruction,
    /// Offset plus the length of a placeholder string
    LengthOffset,
    /// Nested `min`/`max` calls
    MinMaxChain,
    /// Two bytes from a static table
    ByteSplitReconstruction,
    /// Indirect read of a native memory cell
    IndirectMemoryLoad,
    /// Byte-swapped literal plus byte reversal
    ByteReversal,
}

impl StrategyKind {
    /// Name used in policies and reports.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Instantiates the strategy.
    #[must_use]
    pub fn instantiate(self) -> Arc<dyn ConstantStrategy> {
        match self {
            StrategyKind::BitwiseComposition => Arc::new(BitwiseComposition),
            StrategyKind::ShiftReconstruction => Arc::new(ShiftReconstruction),
            StrategyKind::LengthOffset => Arc::new(LengthOffset),
            StrategyKind::MinMaxChain => Arc::new(MinMaxChain),
            StrategyKind::ByteSplitReconstruction => Arc::new(ByteSplitReconstruction),
            StrategyKind::IndirectMemoryLoad => Arc::new(IndirectMemoryLoad),
            StrategyKind::ByteReversal => Arc::new(ByteReversal),
        }
    }
}

/// Registry of strategies available to the selector, in registration order.
#[derive(Clone, Default)]
pub struct StrategyPool {
    strategies: Vec<Arc<dyn ConstantStrategy>>,
}

impl StrategyPool {
    /// An empty pool.
    #[must_use]
    pub fn empty() -> Self {
        StrategyPool {
            strategies: Vec::new(),
        }
    }

    /// A pool with all seven built-in strategies.
    #[must_use]
    pub fn builtin() -> Self {
        StrategyPool {
            strategies: StrategyKind::iter().map(StrategyKind::instantiate).collect(),
        }
    }

    /// Adds `strategy`, replacing any strategy registered under the same name.
    pub fn register(&mut self, strategy: impl ConstantStrategy + 'static) {
        self.register_arc(Arc::new(strategy));
    }

    /// Adds a shared strategy, replacing any strategy registered under the same name.
    pub fn register_arc(&mut self, strategy: Arc<dyn ConstantStrategy>) {
        match self
            .strategies
            .iter()
            .position(|existing| existing.name() == strategy.name())
        {
            Some(index) => self.strategies[index] = strategy,
            None => self.strategies.push(strategy),
        }
    }

    /// Looks up a strategy by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ConstantStrategy>> {
        self.strategies.iter().find(|s| s.name() == name)
    }

    /// Names of all registered strategies.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// All registered strategies.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ConstantStrategy>> {
        self.strategies.iter()
    }

    /// Number of registered strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Returns `true` if no strategy is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl std::fmt::Debug for StrategyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyPool")
            .field("strategies", &self.names())
            .finish()
    }
}

/// Error for a target a strategy cannot handle.
pub(crate) fn unsupported(strategy: &str, target: i16) -> Error {
    Error::UnsupportedWidth {
        value: i64::from(target),
        strategy: strategy.to_string(),
    }
}

/// Error for a strategy that ran out of leak-free parameter choices.
pub(crate) fn exhausted(strategy: &str, target: i16) -> Error {
    Error::ImmediateLeak {
        strategy: strategy.to_string(),
        value: i64::from(target),
    }
}
