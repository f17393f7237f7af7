//! Property-based tests for the rewrite engine.
//!
//! These tests generate arbitrary literal-heavy sequences and policies and check that:
//! 1. Every rewrite is accepted by the standalone verifier
//! 2. No rewritten region carries its own value as an immediate
//! 3. A fixed seed always produces the same output
//! 4. Rewriting never changes what the sequence computes
//! 5. No strategy tree is deeper than the policy allows

use std::collections::BTreeSet;

use litcloak::{
    assembly::{AuxAllocator, InstructionSequence, Opcode, SequenceBuilder},
    emulation::{EmValue, StackMachine},
    obfuscate,
    obfuscation::{ObfuscationSite, SiteStatus, StrategySelector},
    strategy::{StrategyContext, StrategyPool},
    verify, Policy,
};
use proptest::prelude::*;
use rand::{rngs::StdRng, SeedableRng};

// =============================================================================
// STRATEGY GENERATORS
// =============================================================================

/// Literal values biased towards the edges of the 16-bit range.
fn literal_value() -> impl Strategy<Value = i32> {
    prop_oneof![
        any::<i16>().prop_map(i32::from),
        Just(0),
        Just(-1),
        Just(i32::from(i16::MIN)),
        Just(i32::from(i16::MAX)),
        (0i32..16),
        // Wider values are never sites
        (65_536i32..1_000_000),
    ]
}

/// A list of literals, each pushed and popped.
fn literal_sequence() -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(literal_value(), 1..12)
}

fn policy() -> impl Strategy<Value = Policy> {
    (any::<u64>(), 1u32..=3, 0.0f64..=1.0).prop_map(|(seed, depth, probability)| {
        Policy::default()
            .with_seed(seed)
            .with_max_nesting_depth(depth)
            .with_nesting_probability(probability)
    })
}

fn build(values: &[i32]) -> InstructionSequence {
    let mut builder = SequenceBuilder::new("Generated::run");
    for &value in values {
        builder.push_int(value).unwrap();
        builder.simple(Opcode::Pop).unwrap();
    }
    builder.ret().unwrap();
    builder.build().unwrap()
}

/// A sequence that sums all literals and returns the result.
fn build_sum(values: &[i32]) -> InstructionSequence {
    let mut builder = SequenceBuilder::new("Generated::sum");
    builder.push_int(0).unwrap();
    for &value in values {
        builder.push_int(value).unwrap();
        builder.simple(Opcode::IAdd).unwrap();
    }
    builder.build().unwrap()
}

// =============================================================================
// ENGINE PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn obfuscated_sequences_verify(values in literal_sequence(), policy in policy()) {
        let original = build(&values);
        let output = obfuscate(&original, &policy).unwrap();
        prop_assert!(verify(&original, &output.sequence).is_ok());
        prop_assert_eq!(output.report.rewritten_len, output.sequence.len());
        prop_assert_eq!(
            output.report.sites.len(),
            values.iter().filter(|v| i16::try_from(**v).is_ok()).count()
        );
    }

    #[test]
    fn rewritten_regions_do_not_leak(values in literal_sequence(), policy in policy()) {
        let output = obfuscate(&build(&values), &policy).unwrap();
        let sequence = &output.sequence;
        for region in sequence.regions() {
            let code = &sequence.instructions()[region.start..region.start + region.len];
            for imm in code.iter().filter_map(|instr| instr.immediate()) {
                prop_assert_ne!(imm.as_i64(), i64::from(region.value), "{}", region.strategy);
            }
        }
    }

    #[test]
    fn fixed_seed_is_deterministic(values in literal_sequence(), policy in policy()) {
        let original = build(&values);
        let first = obfuscate(&original, &policy).unwrap();
        let second = obfuscate(&original, &policy).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn rewriting_preserves_the_result(values in literal_sequence(), policy in policy()) {
        let original = build_sum(&values);
        let output = obfuscate(&original, &policy).unwrap();

        let expected = StackMachine::evaluate(original.instructions(), original.auxiliary_data()).unwrap();
        let actual = StackMachine::evaluate(
            output.sequence.instructions(),
            output.sequence.auxiliary_data(),
        )
        .unwrap();
        prop_assert_eq!(&actual, &expected);
        prop_assert_eq!(expected.len(), 1);
        prop_assert!(matches!(expected[0], EmValue::I32(_)));
    }

    #[test]
    fn plans_respect_the_depth_limit(
        value in any::<i16>(),
        policy in policy(),
        seed in any::<u64>(),
    ) {
        let pool = StrategyPool::builtin();
        let selector = StrategySelector::new(&pool, &policy);
        let site = ObfuscationSite {
            position: 0,
            original_position: 0,
            value,
        };
        let mut rng = StdRng::seed_from_u64(seed);
        let mut aux = AuxAllocator::default();
        let mut ctx = StrategyContext::new(&mut rng, &mut aux);

        match selector.plan(&site, &BTreeSet::new(), &mut ctx) {
            Ok(plan) => prop_assert!(
                plan.depth() <= policy.max_nesting_depth,
                "{} under depth {}",
                plan.render(),
                policy.max_nesting_depth
            ),
            Err(e) => prop_assert!(e.is_recoverable(), "{}", e),
        }
    }

    #[test]
    fn reported_depths_respect_the_limit(values in literal_sequence(), policy in policy()) {
        let output = obfuscate(&build(&values), &policy).unwrap();
        for site in &output.report.sites {
            if let SiteStatus::Rewritten { depth, strategy, .. } = &site.status {
                prop_assert!(*depth >= 1 && *depth <= policy.max_nesting_depth, "{}", strategy);
            }
        }
    }
}
