//! Integration tests for the built-in reconstruction strategies.
//!
//! Every strategy is expanded for every 16-bit value and checked for the three properties a
//! replacement must have: it computes the value, it pushes exactly one integer, and none of
//! its fixed instructions carries the value as an immediate. Operand slots
//! ([`Fragment::Literal`]) may equal the value; the selector nests those away.

use litcloak::{
    assembly::{AuxAllocator, Instruction},
    prelude::*,
    strategy::{
        reverse16, BitwiseComposition, BitwiseParams, ChainShape, Fragment, LengthOffset,
        LengthParams, MinMaxChain, MinMaxParams,
    },
};
use rand::{rngs::StdRng, SeedableRng};

/// Executes `code` one instruction at a time and returns the top of stack after each step.
fn trace(code: &[Instruction]) -> Vec<EmValue> {
    let mut machine = StackMachine::new(&[]);
    code.iter()
        .map(|instr| {
            machine.execute(instr).unwrap();
            machine.stack().peek().unwrap().clone()
        })
        .collect()
}

fn fixed_immediates_hide(expansion: &Expansion, target: i16) -> bool {
    expansion.fragments().iter().all(|fragment| match fragment {
        Fragment::Instruction(instr) => instr
            .immediate()
            .map_or(true, |imm| imm.as_i64() != i64::from(target)),
        Fragment::Literal(_) => true,
    })
}

fn check_all_values(kind: StrategyKind) -> Result<()> {
    let strategy = kind.instantiate();
    let analyzer = StackAnalyzer::for_strategy(kind.name());
    let mut rng = StdRng::seed_from_u64(u64::from(kind as u8));
    let mut aux = AuxAllocator::default();
    let mut unsupported = 0usize;

    for target in i16::MIN..=i16::MAX {
        let mut ctx = StrategyContext::new(&mut rng, &mut aux);
        let expansion = match strategy.expand(target, &mut ctx) {
            Ok(expansion) => expansion,
            Err(Error::UnsupportedWidth { .. }) => {
                unsupported += 1;
                continue;
            }
            Err(e) => panic!("{kind} failed on {target}: {e}"),
        };

        let code = expansion.instructions();
        analyzer.validate_replacement(&code)?;
        assert!(StackEffect::of(&code).is_int_push(), "{kind} on {target}");
        assert_eq!(
            StackMachine::evaluate(&code, expansion.auxiliary_data())?,
            vec![EmValue::I32(i32::from(target))],
            "{kind} on {target}"
        );
        assert!(
            fixed_immediates_hide(&expansion, target),
            "{kind} embeds {target} in a fixed instruction"
        );
    }

    // Only the bottom of the range may fall outside a strategy's preconditions
    assert!(unsupported <= 1, "{kind} rejected {unsupported} values");
    Ok(())
}

#[test]
fn test_bitwise_composition_all_values() -> Result<()> {
    check_all_values(StrategyKind::BitwiseComposition)
}

#[test]
fn test_shift_reconstruction_all_values() -> Result<()> {
    check_all_values(StrategyKind::ShiftReconstruction)
}

#[test]
fn test_length_offset_all_values() -> Result<()> {
    check_all_values(StrategyKind::LengthOffset)
}

#[test]
fn test_min_max_chain_all_values() -> Result<()> {
    check_all_values(StrategyKind::MinMaxChain)
}

#[test]
fn test_byte_split_reconstruction_all_values() -> Result<()> {
    check_all_values(StrategyKind::ByteSplitReconstruction)
}

#[test]
fn test_indirect_memory_load_all_values() -> Result<()> {
    check_all_values(StrategyKind::IndirectMemoryLoad)
}

#[test]
fn test_byte_reversal_all_values() -> Result<()> {
    check_all_values(StrategyKind::ByteReversal)
}

#[test]
fn test_byte_reversal_is_an_involution() {
    for value in i16::MIN..=i16::MAX {
        assert_eq!(reverse16(reverse16(value)), value);
    }
}

/// `~X ^ (A | B)` for 9999 with the masks 0x4C94 and 0x418E.
#[test]
fn test_bitwise_scenario_steps() -> Result<()> {
    let params = BitwiseParams::solve(9999, 0x4C94, 0x418E);
    assert_eq!((params.x, params.a, params.b), (-27282, 19604, 16782));

    let code = BitwiseComposition::emit(params)?.instructions();
    let tops = trace(&code);
    assert_eq!(tops[0], EmValue::I32(-27282));
    assert_eq!(tops[1], EmValue::I32(!-27282));
    assert_eq!(tops[4], EmValue::I32(19604 | 16782));
    assert_eq!(tops[5], EmValue::I32(9999));
    Ok(())
}

/// `9989 + "QWERTYUIOP".length()`
#[test]
fn test_length_offset_scenario_steps() -> Result<()> {
    let params = LengthParams::new(9999, "QWERTYUIOP").unwrap();
    assert_eq!(params.offset, 9989);

    let code = LengthOffset::emit(&params)?.instructions();
    let tops = trace(&code);
    assert_eq!(
        tops,
        vec![
            EmValue::I32(9989),
            EmValue::Str("QWERTYUIOP".to_string()),
            EmValue::I32(10),
            EmValue::I32(9999),
        ]
    );
    Ok(())
}

/// `min(max(9968, 9999), max(10027, 9973))`
#[test]
fn test_min_max_scenario_steps() -> Result<()> {
    let params = MinMaxParams {
        shape: ChainShape::MinOfMax,
        first: (9968, 9999),
        second: (10027, 9973),
    };
    assert_eq!(params.value(), 9999);

    let code = MinMaxChain::emit(params)?.instructions();
    let tops = trace(&code);
    assert_eq!(tops[2], EmValue::I32(9999));
    assert_eq!(tops[5], EmValue::I32(10027));
    assert_eq!(tops[6], EmValue::I32(9999));
    assert_eq!(StackMachine::evaluate(&code, &[])?, vec![EmValue::I32(9999)]);
    Ok(())
}

#[test]
fn test_expansion_is_fresh_per_call() -> Result<()> {
    let strategy = StrategyKind::BitwiseComposition.instantiate();
    let mut rng = StdRng::seed_from_u64(3);
    let mut aux = AuxAllocator::default();

    let mut ctx = StrategyContext::new(&mut rng, &mut aux);
    let first = strategy.expand(9999, &mut ctx)?;
    let second = strategy.expand(9999, &mut ctx)?;
    assert_ne!(first, second);
    Ok(())
}
