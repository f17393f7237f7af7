//! Min-max chain: the target survives a tournament of `min` and `max` calls.
//!
//! ```text
//! min(max(a, b), max(c, d))      a or b is the target, the other is below it
//!                                c or d is above the target
//! max(min(a, b), min(c, d))      dual: a or b is the target, the other is above it
//!                                c or d is below the target
//! ```
//!
//! The target itself appears as one of the operands. On its own the chain therefore hides
//! nothing; it is only useful because that operand is a [`Fragment::Literal`] the selector
//! always replaces with a nested rewrite.
//!
//! [`Fragment::Literal`]: crate::strategy::Fragment::Literal

use rand::Rng;

use crate::{
    assembly::{Instruction, Intrinsic},
    strategy::{exhausted, ConstantStrategy, Expansion, StrategyContext, MAX_RESAMPLES},
    Result,
};

/// Largest distance between the target and its bounding operands.
const SPREAD: i32 = 128;

/// Which of the two dual forms the chain takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainShape {
    /// `min(max(a, b), max(c, d))`
    MinOfMax,
    /// `max(min(a, b), min(c, d))`
    MaxOfMin,
}

impl ChainShape {
    fn inner(self) -> Intrinsic {
        match self {
            ChainShape::MinOfMax => Intrinsic::Max,
            ChainShape::MaxOfMin => Intrinsic::Min,
        }
    }

    fn outer(self) -> Intrinsic {
        match self {
            ChainShape::MinOfMax => Intrinsic::Min,
            ChainShape::MaxOfMin => Intrinsic::Max,
        }
    }
}

/// Operands of one min-max chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinMaxParams {
    /// Chain form
    pub shape: ChainShape,
    /// Operands of the first inner call, one of which is the target
    pub first: (i32, i32),
    /// Operands of the second inner call
    pub second: (i32, i32),
}

impl MinMaxParams {
    /// Computes the chain's value.
    #[must_use]
    pub fn value(&self) -> i32 {
        let (a, b) = self.first;
        let (c, d) = self.second;
        match self.shape {
            ChainShape::MinOfMax => a.max(b).min(c.max(d)),
            ChainShape::MaxOfMin => a.min(b).max(c.min(d)),
        }
    }
}

/// Reconstructs a value as the result of nested `min`/`max` calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinMaxChain;

impl MinMaxChain {
    /// Emits the template for fixed parameters.
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for symmetry with the other strategies.
    pub fn emit(params: MinMaxParams) -> Result<Expansion> {
        let inner = Instruction::intrinsic(params.shape.inner());
        let mut expansion = Expansion::new("min-max-chain");
        expansion
            .literal(params.first.0)
            .literal(params.first.1)
            .instruction(inner.clone())
            .literal(params.second.0)
            .literal(params.second.1)
            .instruction(inner)
            .instruction(Instruction::intrinsic(params.shape.outer()));
        Ok(expansion)
    }

    /// Draws a 16-bit value different from `target`.
    fn decoy(target: i16, ctx: &mut StrategyContext<'_>) -> Option<i32> {
        (0..MAX_RESAMPLES)
            .map(|_| ctx.rng.random::<i16>())
            .find(|&v| v != target)
            .map(i32::from)
    }
}

impl ConstantStrategy for MinMaxChain {
    fn name(&self) -> &'static str {
        "min-max-chain"
    }

    fn description(&self) -> &'static str {
        "min of maxima or max of minima, the target nested inside"
    }

    fn embeds_target(&self) -> bool {
        true
    }

    fn expand(&self, target: i16, ctx: &mut StrategyContext<'_>) -> Result<Expansion> {
        let t = i32::from(target);
        let shape = if ctx.rng.random_bool(0.5) {
            ChainShape::MinOfMax
        } else {
            ChainShape::MaxOfMin
        };

        // The partner of the target loses the inner call; the bound loses the outer one
        let (partner, bound) = match shape {
            ChainShape::MinOfMax => (
                t - ctx.rng.random_range(1..=SPREAD),
                t + ctx.rng.random_range(1..=SPREAD),
            ),
            ChainShape::MaxOfMin => (
                t + ctx.rng.random_range(1..=SPREAD),
                t - ctx.rng.random_range(1..=SPREAD),
            ),
        };
        // Any value works here: the inner call only moves further from the target
        let free = Self::decoy(target, ctx).ok_or_else(|| exhausted(self.name(), target))?;

        let first = if ctx.rng.random_bool(0.5) {
            (t, partner)
        } else {
            (partner, t)
        };
        let second = if ctx.rng.random_bool(0.5) {
            (bound, free)
        } else {
            (free, bound)
        };

        Self::emit(MinMaxParams {
            shape,
            first,
            second,
        })
    }
}
