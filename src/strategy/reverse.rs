//! Byte reversal: the literal is stored byte-swapped and swapped back at runtime.
//!
//! ```text
//! iconst reverse16(target)
//! invokestatic short.reverse_bytes
//! ```
//!
//! For byte palindromes (`0x0000`, `0x1212`, ...) the stored literal equals the target. It is
//! emitted as a nestable literal, so the selector hides it like any other leaked operand.

use crate::{
    assembly::{Instruction, Intrinsic},
    strategy::{ConstantStrategy, Expansion, StrategyContext},
    Result,
};

/// Swaps the two bytes of a 16-bit value.
///
/// This is an involution: `reverse16(reverse16(v)) == v`.
#[must_use]
pub fn reverse16(value: i16) -> i16 {
    value.swap_bytes()
}

/// Reconstructs a value by reversing the bytes of a swapped literal.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteReversal;

impl ByteReversal {
    /// Emits the template for `target`.
    ///
    /// # Errors
    ///
    /// Never fails; returns `Result` for symmetry with the other strategies.
    pub fn emit(target: i16) -> Result<Expansion> {
        let mut expansion = Expansion::new("byte-reversal");
        expansion
            .literal(i32::from(reverse16(target)))
            .instruction(Instruction::intrinsic(Intrinsic::ReverseBytes16));
        Ok(expansion)
    }
}

impl ConstantStrategy for ByteReversal {
    fn name(&self) -> &'static str {
        "byte-reversal"
    }

    fn description(&self) -> &'static str {
        "byte-swapped literal passed through reverse_bytes"
    }

    fn expand(&self, target: i16, _ctx: &mut StrategyContext<'_>) -> Result<Expansion> {
        Self::emit(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::{EmValue, StackMachine};

    #[test]
    fn test_scenario_9999() {
        assert_eq!(reverse16(9999), 0x0F27);
        let code = ByteReversal::emit(9999).unwrap().instructions();
        assert_eq!(code[0], Instruction::iconst(3879));
        assert_eq!(
            StackMachine::evaluate(&code, &[]).unwrap(),
            vec![EmValue::I32(9999)]
        );
    }

    #[test]
    fn test_involution() {
        for value in [0i16, 1, -1, 0x1234, i16::MIN, i16::MAX, -0x7F01] {
            assert_eq!(reverse16(reverse16(value)), value);
        }
        assert_eq!(reverse16(i16::MIN), 0x0080);
        assert_eq!(reverse16(0x1212), 0x1212);
    }

    #[test]
    fn test_sign_extension_after_reversal() {
        // 0xFF80 is stored as 0x80FF; both are negative once sign-extended
        let code = ByteReversal::emit(-128).unwrap().instructions();
        assert_eq!(code[0].int_literal(), Some(i32::from(reverse16(-128))));
        assert_eq!(
            StackMachine::evaluate(&code, &[]).unwrap(),
            vec![EmValue::I32(-128)]
        );
    }
}
