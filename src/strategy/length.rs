//! Length offset: `(target - len) + placeholder.length()`.
//!
//! The placeholder is a random string of `len` characters. Its length is a compile-time
//! constant of the emitted code, but reading it requires resolving the string and knowing
//! the semantics of the length call.

use rand::Rng;

use crate::{
    assembly::{Instruction, Intrinsic, Opcode},
    strategy::{unsupported, ConstantStrategy, Expansion, StrategyContext},
    Result,
};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_";

/// Longest placeholder the strategy generates.
const MAX_PLACEHOLDER: i32 = 24;

/// Free parameters of one length offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthParams {
    /// `target - placeholder.len()`
    pub offset: i16,
    /// String whose length completes the value
    pub placeholder: String,
}

impl LengthParams {
    /// Derives the offset for `placeholder`.
    ///
    /// Returns `None` if `target - len` does not fit in 16 bits.
    #[must_use]
    pub fn new(target: i16, placeholder: impl Into<String>) -> Option<Self> {
        let placeholder = placeholder.into();
        let len = i32::try_from(placeholder.chars().count()).ok()?;
        let offset = i16::try_from(i32::from(target) - len).ok()?;
        Some(LengthParams {
            offset,
            placeholder,
        })
    }
}

/// Reconstructs a value as an offset plus the length of a constant string.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthOffset;

impl LengthOffset {
    /// Emits the template for fixed parameters.
    ///
    /// # Errors
    ///
    /// Never fails for the opcodes used; returns `Result` for instruction construction.
    pub fn emit(params: &LengthParams) -> Result<Expansion> {
        let mut expansion = Expansion::new("length-offset");
        expansion
            .literal(i32::from(params.offset))
            .instruction(Instruction::sconst(params.placeholder.clone()))
            .instruction(Instruction::intrinsic(Intrinsic::StringLength))
            .instruction(Instruction::simple(Opcode::IAdd)?);
        Ok(expansion)
    }
}

impl ConstantStrategy for LengthOffset {
    fn name(&self) -> &'static str {
        "length-offset"
    }

    fn description(&self) -> &'static str {
        "offset plus the length of a placeholder string"
    }

    fn expand(&self, target: i16, ctx: &mut StrategyContext<'_>) -> Result<Expansion> {
        // Room below the target for the offset to stay in range
        let headroom = i32::from(target) - i32::from(i16::MIN);
        let max_len = headroom.min(MAX_PLACEHOLDER);
        if max_len < 1 {
            return Err(unsupported(self.name(), target));
        }

        let len = ctx.rng.random_range(1..=max_len);
        let placeholder: String = (0..len)
            .map(|_| char::from(ALPHABET[ctx.rng.random_range(0..ALPHABET.len())]))
            .collect();
        let params =
            LengthParams::new(target, placeholder).ok_or_else(|| unsupported(self.name(), target))?;
        Self::emit(&params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::AuxAllocator,
        emulation::{EmValue, StackMachine},
        strategy::Fragment,
        Error,
    };
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_scenario_9999() {
        let params = LengthParams::new(9999, "QWERTYUIOP").unwrap();
        assert_eq!(params.offset, 9989);

        let code = LengthOffset::emit(&params).unwrap().instructions();
        assert_eq!(code[0], Instruction::iconst(9989));
        assert_eq!(
            StackMachine::evaluate(&code, &[]).unwrap(),
            vec![EmValue::I32(9999)]
        );
    }

    #[test]
    fn test_minimum_is_unsupported() {
        assert!(LengthParams::new(i16::MIN, "x").is_none());

        let mut rng = StdRng::seed_from_u64(1);
        let mut aux = AuxAllocator::default();
        let mut ctx = StrategyContext::new(&mut rng, &mut aux);
        assert!(matches!(
            LengthOffset.expand(i16::MIN, &mut ctx),
            Err(Error::UnsupportedWidth { value: -32768, .. })
        ));

        // Only a one-character placeholder fits
        let expansion = LengthOffset.expand(i16::MIN + 1, &mut ctx).unwrap();
        assert_eq!(expansion.fragments()[0], Fragment::Literal(-32768));
    }
}
