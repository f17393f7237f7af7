//! Shift reconstruction: the target travels in the upper bits of a wider carrier.
//!
//! The carrier `W` holds the target's 16 bits at bit offset `S` (a multiple of 16) with random
//! noise below and, for 64-bit carriers, above. An unsigned right shift by `S` moves the
//! target back to the low bits, and `i2s` discards the noise above bit 15 and restores the
//! sign.
//!
//! ```text
//! iconst W            lconst W
//! iconst 16           iconst S        (S in 16, 32, 48)
//! iushr               lushr
//! i2s                 l2i
//!                     i2s
//! ```

use rand::Rng;

use crate::{
    assembly::{Instruction, Opcode},
    strategy::{exhausted, ConstantStrategy, Expansion, StrategyContext, MAX_RESAMPLES},
    Result,
};

/// Width of the carrier value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carrier {
    /// 32-bit carrier, shift amount 16
    Int,
    /// 64-bit carrier, shift amount 16, 32 or 48
    Long,
}

/// Free parameters of one shift reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftParams {
    /// Carrier width
    pub carrier: Carrier,
    /// Shift amount
    pub shift: u32,
    /// The wide immediate; for [`Carrier::Int`] only the low 32 bits are used
    pub wide: i64,
}

impl ShiftParams {
    /// Builds a carrier with `target` at bit `shift` and the given noise elsewhere.
    ///
    /// Noise bits that overlap the target's position are ignored.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    pub fn compose(target: i16, carrier: Carrier, shift: u32, noise: u64) -> Self {
        let field = 0xFFFFu64 << shift;
        let bits = (u64::from(target as u16) << shift) | (noise & !field);
        let wide = match carrier {
            Carrier::Int => i64::from(bits as u32 as i32),
            Carrier::Long => bits as i64,
        };
        ShiftParams {
            carrier,
            shift,
            wide,
        }
    }
}

/// Reconstructs a value by shifting it out of a wider carrier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShiftReconstruction;

impl ShiftReconstruction {
    /// Emits the template for fixed parameters.
    ///
    /// # Errors
    ///
    /// Never fails for the opcodes used; returns `Result` for instruction construction.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn emit(params: ShiftParams) -> Result<Expansion> {
        let mut expansion = Expansion::new("shift-reconstruction");
        match params.carrier {
            Carrier::Int => {
                expansion
                    .instruction(Instruction::iconst(params.wide as i32))
                    .literal(params.shift as i32)
                    .instruction(Instruction::simple(Opcode::IUshr)?);
            }
            Carrier::Long => {
                expansion
                    .instruction(Instruction::lconst(params.wide))
                    .literal(params.shift as i32)
                    .instruction(Instruction::simple(Opcode::LUshr)?)
                    .instruction(Instruction::simple(Opcode::L2I)?);
            }
        }
        expansion.instruction(Instruction::simple(Opcode::I2S)?);
        Ok(expansion)
    }
}

impl ConstantStrategy for ShiftReconstruction {
    fn name(&self) -> &'static str {
        "shift-reconstruction"
    }

    fn description(&self) -> &'static str {
        "unsigned shift of a wide carrier, narrowed to 16 bits"
    }

    fn expand(&self, target: i16, ctx: &mut StrategyContext<'_>) -> Result<Expansion> {
        for _ in 0..MAX_RESAMPLES {
            let (carrier, shift) = if ctx.rng.random_bool(0.5) {
                (Carrier::Int, 16)
            } else {
                (Carrier::Long, [16, 32, 48][ctx.rng.random_range(0..3)])
            };
            let params = ShiftParams::compose(target, carrier, shift, ctx.rng.random());
            if params.wide != i64::from(target) {
                return Self::emit(params);
            }
        }
        Err(exhausted(self.name(), target))
    }
}
