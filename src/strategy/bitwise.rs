//! Bitwise composition: `target == ~X ^ (A | B)`.
//!
//! `A` and `B` are drawn at random; `X` is solved backward as `~(target ^ (A | B))`. All three
//! are sign-extended 16-bit quantities, so each can itself be nested.
//!
//! ```text
//! iconst X
//! inot
//! iconst A
//! iconst B
//! ior
//! ixor
//! ```

use rand::Rng;

use crate::{
    assembly::{Instruction, Opcode},
    strategy::{exhausted, ConstantStrategy, Expansion, StrategyContext, MAX_RESAMPLES},
    Result,
};

/// Free parameters of one bitwise composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitwiseParams {
    /// Operand of the complement
    pub x: i32,
    /// First mask
    pub a: i32,
    /// Second mask
    pub b: i32,
}

impl BitwiseParams {
    /// Solves `x` for the given masks.
    #[must_use]
    pub fn solve(target: i16, a: i16, b: i16) -> Self {
        let (a, b) = (i32::from(a), i32::from(b));
        BitwiseParams {
            x: !(i32::from(target) ^ (a | b)),
            a,
            b,
        }
    }

    fn leaks(&self, target: i16) -> bool {
        let target = i32::from(target);
        self.x == target || self.a == target || self.b == target
    }
}

/// Reconstructs a value from a complement, an OR of two masks and an XOR.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitwiseComposition;

impl BitwiseComposition {
    /// Emits the template for fixed parameters.
    ///
    /// # Errors
    ///
    /// Never fails for the opcodes used; returns `Result` for instruction construction.
    pub fn emit(params: BitwiseParams) -> Result<Expansion> {
        let mut expansion = Expansion::new("bitwise-composition");
        expansion
            .literal(params.x)
            .instruction(Instruction::simple(Opcode::INot)?)
            .literal(params.a)
            .literal(params.b)
            .instruction(Instruction::simple(Opcode::IOr)?)
            .instruction(Instruction::simple(Opcode::IXor)?);
        Ok(expansion)
    }
}

impl ConstantStrategy for BitwiseComposition {
    fn name(&self) -> &'static str {
        "bitwise-composition"
    }

    fn description(&self) -> &'static str {
        "complement, OR of two masks, XOR"
    }

    fn expand(&self, target: i16, ctx: &mut StrategyContext<'_>) -> Result<Expansion> {
        for _ in 0..MAX_RESAMPLES {
            let a: i16 = ctx.rng.random();
            let b: i16 = ctx.rng.random();
            let params = BitwiseParams::solve(target, a, b);
            if !params.leaks(target) {
                return Self::emit(params);
            }
        }
        Err(exhausted(self.name(), target))
    }
}
