//! Integration tests for the rewrite engine.
//!
//! These tests drive [`obfuscate`] and [`ObfuscationEngine`] end to end: splicing and
//! renumbering of branches, switches and exception handlers, failure handling through the
//! retry budget, auxiliary declarations, parallel processing and re-verification of every
//! result with [`verify`].

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use litcloak::prelude::*;

/// `push 1000; push 2000` on either side of a conditional branch.
fn branching() -> Result<InstructionSequence> {
    let mut builder = SequenceBuilder::new("Branching::pick");
    builder
        .iload(0)?
        .branch(Opcode::IfEq, "else")?
        .push_int(1000)?
        .ret_value()?
        .label("else")?
        .push_int(2000)?
        .ret_value()?;
    builder.build()
}

fn literals(id: &str, values: &[i32]) -> Result<InstructionSequence> {
    let mut builder = SequenceBuilder::new(id);
    for &value in values {
        builder.push_int(value)?.simple(Opcode::Pop)?;
    }
    builder.ret()?;
    builder.build()
}

fn region_start(sequence: &InstructionSequence, value: i16) -> usize {
    sequence
        .regions()
        .iter()
        .find(|region| region.value == value)
        .map(|region| region.start)
        .unwrap()
}

fn assert_no_leaks(sequence: &InstructionSequence) {
    for region in sequence.regions() {
        let code = &sequence.instructions()[region.start..region.start + region.len];
        assert!(
            code.iter()
                .filter_map(Instruction::immediate)
                .all(|imm| imm.as_i64() != i64::from(region.value)),
            "{} leaks {}",
            region.strategy,
            region.value
        );
    }
}

/// Pushes `target + 1`.
struct OffByOne;

impl ConstantStrategy for OffByOne {
    fn name(&self) -> &'static str {
        "off-by-one"
    }

    fn is_leaf(&self) -> bool {
        true
    }

    fn expand(&self, target: i16, _ctx: &mut StrategyContext<'_>) -> Result<Expansion> {
        let mut expansion = Expansion::new(self.name());
        expansion.instruction(Instruction::iconst(i32::from(target) + 1));
        Ok(expansion)
    }
}

/// Pops from an empty stack.
struct Underflowing;

impl ConstantStrategy for Underflowing {
    fn name(&self) -> &'static str {
        "underflowing"
    }

    fn expand(&self, target: i16, _ctx: &mut StrategyContext<'_>) -> Result<Expansion> {
        let mut expansion = Expansion::new(self.name());
        expansion
            .literal(i32::from(target) ^ 0x5555)
            .instruction(Instruction::simple(Opcode::IXor)?);
        Ok(expansion)
    }
}

#[test]
fn test_single_literal_is_replaced_and_verified() -> Result<()> {
    let mut builder = SequenceBuilder::new("Config::port");
    builder.push_int(9999)?.ret_value()?;
    let original = builder.build()?;

    let output = obfuscate(&original, &Policy::default().with_seed(1))?;
    assert_eq!(output.report.rewritten_count(), 1);
    assert!(output.sequence.len() > original.len());
    assert_eq!(
        output.sequence.instructions().last(),
        original.instructions().last()
    );
    assert_no_leaks(&output.sequence);
    verify(&original, &output.sequence)?;
    Ok(())
}

#[test]
fn test_each_strategy_as_root() -> Result<()> {
    let original = literals("roots", &[9999, -1, 0, 255, i32::from(i16::MIN), 0x1212])?;

    for kind in StrategyPool::builtin().names() {
        let policy = Policy::default()
            .with_seed(9)
            .with_max_nesting_depth(1)
            .with_allowed_strategies([kind]);
        let output = obfuscate(&original, &policy)?;
        verify(&original, &output.sequence)?;
        assert_no_leaks(&output.sequence);

        for site in &output.report.sites {
            if let SiteStatus::Rewritten {
                strategy, depth, ..
            } = &site.status
            {
                assert!(strategy.starts_with(kind), "{strategy} under {kind}");
                assert_eq!(*depth, 1, "{strategy}");
            }
        }
    }
    Ok(())
}

#[test]
fn test_light_policy_never_nests() -> Result<()> {
    let values: Vec<i32> = (0..200).map(|i| i * 331 - 33_000).collect();
    let original = literals("flat", &values)?;
    let output = obfuscate(&original, &Policy::light().with_seed(17))?;
    verify(&original, &output.sequence)?;
    assert_no_leaks(&output.sequence);
    assert_eq!(output.report.failed_count(), 0);

    let names = StrategyPool::builtin().names();
    for site in &output.report.sites {
        if let SiteStatus::Rewritten {
            strategy, depth, ..
        } = &site.status
        {
            assert_eq!(*depth, 1, "{strategy}");
            let operands = &strategy[strategy.find('(').unwrap_or(strategy.len())..];
            assert!(
                names.iter().all(|name| !operands.contains(name)),
                "{strategy}"
            );
        }
    }
    Ok(())
}

#[test]
fn test_bitwise_only_reconstructs_9999() -> Result<()> {
    let original = literals("bitwise", &[9999])?;
    let policy = Policy::light().with_allowed_strategies([StrategyKind::BitwiseComposition.name()]);
    let output = obfuscate(&original, &policy)?;

    let region = &output.sequence.regions()[0];
    assert!(region.strategy.starts_with("bitwise-composition("));
    assert_eq!(region.len, 6);
    let code = &output.sequence.instructions()[region.start..region.start + region.len];
    assert_eq!(StackMachine::evaluate(code, &[])?, vec![EmValue::I32(9999)]);
    Ok(())
}

#[test]
fn test_same_seed_is_bit_identical() -> Result<()> {
    let original = literals("determinism", &[1, 2, 3, 9999, -9999, 42])?;
    let policy = Policy::strong().with_seed(0xC0FFEE);

    let first = obfuscate(&original, &policy)?;
    let second = obfuscate(&original, &policy)?;
    assert_eq!(first, second);

    let other = obfuscate(&original, &policy.clone().with_seed(0xBEEF))?;
    assert_ne!(first.sequence, other.sequence);
    Ok(())
}

#[test]
fn test_branch_targets_are_renumbered() -> Result<()> {
    let original = branching()?;
    let output = obfuscate(&original, &Policy::default().with_seed(4))?;
    verify(&original, &output.sequence)?;

    let branch = output
        .sequence
        .instructions()
        .iter()
        .find(|instr| instr.opcode() == Opcode::IfEq)
        .unwrap();
    // The branch lands on the first instruction of the replacement
    assert_eq!(
        branch.branch_targets(),
        vec![region_start(&output.sequence, 2000)]
    );
    assert_eq!(region_start(&output.sequence, 1000), 2);

    let analysis = StackAnalyzer::new().analyze_sequence(&output.sequence)?;
    assert!(analysis.unreachable().is_empty());
    Ok(())
}

#[test]
fn test_switch_targets_are_renumbered() -> Result<()> {
    let mut builder = SequenceBuilder::new("Dispatch::run");
    builder
        .iload(0)?
        .switch(&["a", "b"])?
        .push_int(7)?
        .ret_value()?
        .label("a")?
        .push_int(8)?
        .ret_value()?
        .label("b")?
        .push_int(9)?
        .ret_value()?;
    let original = builder.build()?;

    let output = obfuscate(&original, &Policy::default().with_seed(12))?;
    verify(&original, &output.sequence)?;

    let switch = output.sequence.get(1).unwrap();
    assert_eq!(switch.opcode(), Opcode::Switch);
    assert_eq!(
        switch.branch_targets(),
        vec![
            region_start(&output.sequence, 8),
            region_start(&output.sequence, 9)
        ]
    );
    Ok(())
}

#[test]
fn test_exception_handlers_are_renumbered() -> Result<()> {
    let mut builder = SequenceBuilder::new("Guarded::run");
    builder
        .label("try")?
        .push_int(10)?
        .istore(1)?
        .push_int(20)?
        .ret_value()?
        .label("catch")?
        .simple(Opcode::Pop)?
        .push_int(30)?
        .ret_value()?
        .label("end")?
        .handler("try", "catch", "catch", "end")?;
    let original = builder.build()?;

    let output = obfuscate(&original, &Policy::default().with_seed(8))?;
    verify(&original, &output.sequence)?;
    assert_eq!(output.report.rewritten_count(), 3);

    let handler = output.sequence.handlers()[0];
    assert_eq!(handler.try_start, 0);
    assert_eq!(handler.try_end, handler.handler_start);
    assert_eq!(
        output.sequence.get(handler.handler_start).map(Instruction::opcode),
        Some(Opcode::Pop)
    );
    assert_eq!(handler.handler_end, output.sequence.len());
    Ok(())
}

#[test]
fn test_mismatching_strategy_is_retried() -> Result<()> {
    let mut pool = StrategyPool::builtin();
    pool.register(OffByOne);
    let policy = Policy::default()
        .with_seed(5)
        .with_max_nesting_depth(1)
        .with_allowed_strategies(["off-by-one", "byte-reversal"]);
    let engine = ObfuscationEngine::with_pool(policy, pool)?;

    let original = literals("retry", &[9999, 1234, -77])?;
    let output = engine.process(&original)?;
    verify(&original, &output.sequence)?;

    for site in &output.report.sites {
        match &site.status {
            SiteStatus::Rewritten {
                strategy, attempts, ..
            } => {
                assert!(strategy.starts_with("byte-reversal"), "{strategy}");
                assert!(*attempts <= 2);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    Ok(())
}

#[test]
fn test_exhausted_budget_leaves_site_and_reports_it() -> Result<()> {
    let mut pool = StrategyPool::empty();
    pool.register(OffByOne);
    let policy = Policy::default().with_retry_budget(3);
    let engine = ObfuscationEngine::with_pool(policy.clone(), pool.clone())?;

    let original = literals("failing", &[5, 6])?;
    let output = engine.process(&original)?;
    assert_eq!(output.sequence.instructions(), original.instructions());
    assert_eq!(output.report.failed_count(), 2);
    match &output.report.sites[0].status {
        SiteStatus::Failed { error, attempts } => {
            assert_eq!(*attempts, 3);
            match error {
                Error::ObfuscationFailed {
                    position,
                    value,
                    attempts,
                    last,
                } => {
                    assert_eq!((*position, *value, *attempts), (0, 5, 3));
                    assert!(matches!(
                        **last,
                        Error::RewriteMismatch {
                            expected: Some(5),
                            actual: Some(6),
                            ..
                        }
                    ));
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let aborting =
        ObfuscationEngine::with_pool(policy.with_failure_action(FailureAction::Abort), pool)?;
    assert!(matches!(
        aborting.process(&original),
        Err(Error::ObfuscationFailed { position: 0, .. })
    ));
    Ok(())
}

#[test]
fn test_defective_strategy_aborts_the_call() -> Result<()> {
    let mut pool = StrategyPool::empty();
    pool.register(Underflowing);
    let engine = ObfuscationEngine::with_pool(Policy::default(), pool)?;

    let err = engine.process(&literals("defect", &[3])?).unwrap_err();
    assert!(err.is_strategy_defect());
    assert!(matches!(
        err,
        Error::StackUnderflow {
            strategy: Some(ref name),
            ..
        } if name == "underflowing"
    ));
    Ok(())
}

#[test]
fn test_branch_operands_can_be_skipped() -> Result<()> {
    let mut builder = SequenceBuilder::new("Compare::five");
    builder
        .iload(0)?
        .push_int(5)?
        .branch(Opcode::IfICmpEq, "eq")?
        .push_int(1)?
        .ret_value()?
        .label("eq")?
        .push_int(2)?
        .ret_value()?;
    let original = builder.build()?;

    let policy = Policy::default().with_skip_branch_operands(true);
    let output = obfuscate(&original, &policy)?;
    verify(&original, &output.sequence)?;
    assert_eq!(output.report.skipped_count(), 1);
    assert_eq!(output.report.rewritten_count(), 2);
    assert_eq!(output.sequence.get(1), original.get(1));
    Ok(())
}

#[test]
fn test_site_growth_limit() -> Result<()> {
    let original = literals("small", &[9999, 300, -4000])?;
    let policy = Policy::light().with_seed(2).with_max_site_growth(2);
    let output = obfuscate(&original, &policy)?;

    verify(&original, &output.sequence)?;
    assert_eq!(output.report.rewritten_count(), 3);
    assert!(output.sequence.regions().iter().all(|region| region.len <= 2));
    Ok(())
}

#[test]
fn test_auxiliary_declarations_are_returned() -> Result<()> {
    let mut builder = SequenceBuilder::new("Cells::load");
    builder
        .auxiliary(AuxiliaryData::ByteTable {
            id: AuxId(4),
            bytes: vec![1, 2, 3],
        })?
        .push_int(11)?
        .push_int(22)?
        .simple(Opcode::IAdd)?
        .ret_value()?;
    let original = builder.build()?;

    let policy =
        Policy::default().with_allowed_strategies([StrategyKind::IndirectMemoryLoad.name()]);
    let output = obfuscate(&original, &policy)?;
    verify(&original, &output.sequence)?;

    let declared = output.sequence.auxiliary_data();
    assert_eq!(declared.len(), 3);
    assert_eq!(declared[0], original.auxiliary_data()[0]);
    assert_eq!(
        declared[1..].to_vec(),
        vec![
            AuxiliaryData::MemoryCell {
                id: AuxId(5),
                width: CellWidth::Short,
                value: 11,
            },
            AuxiliaryData::MemoryCell {
                id: AuxId(6),
                width: CellWidth::Short,
                value: 22,
            },
        ]
    );
    Ok(())
}

#[test]
fn test_obfuscate_all_matches_sequential_runs() -> Result<()> {
    let sequences = vec![
        literals("A::a", &[1, 2])?,
        literals("B::b", &[300])?,
        branching()?,
    ];
    let engine = ObfuscationEngine::new(Policy::default().with_seed(99))?;

    let outputs = engine.obfuscate_all(&sequences)?;
    assert_eq!(outputs.len(), 3);
    for sequence in &sequences {
        let output = &outputs[sequence.id()];
        assert_eq!(output, &engine.process(sequence)?);
        verify(sequence, &output.sequence)?;
    }

    let duplicated = vec![literals("A::a", &[1])?, literals("A::a", &[2])?];
    assert_eq!(
        engine.obfuscate_all(&duplicated),
        Err(Error::DuplicateSequence("A::a".to_string()))
    );
    Ok(())
}

#[test]
fn test_cancellation_between_sites() -> Result<()> {
    let flag = Arc::new(AtomicBool::new(false));
    let engine = ObfuscationEngine::new(Policy::default())?.with_cancellation(Arc::clone(&flag));
    let original = literals("cancel", &[1, 2, 3])?;

    assert!(engine.process(&original).is_ok());
    flag.store(true, Ordering::Relaxed);
    assert_eq!(engine.process(&original), Err(Error::Cancelled));
    Ok(())
}

#[test]
fn test_verify_rejects_foreign_sequences() -> Result<()> {
    let original = literals("foreign", &[5])?;
    let tampered = literals("foreign", &[6])?;
    assert!(matches!(
        verify(&original, &tampered),
        Err(Error::RewriteMismatch { .. })
    ));

    let output = obfuscate(&original, &Policy::default())?;
    assert!(verify(&tampered, &output.sequence).is_err());
    Ok(())
}

#[test]
fn test_repeated_passes_stay_verifiable() -> Result<()> {
    let original = branching()?;
    let first = obfuscate(&original, &Policy::default().with_seed(1))?;
    let second = obfuscate(&first.sequence, &Policy::strong().with_seed(2))?;

    assert_eq!(second.report.rewritten_count(), 0);
    verify(&original, &second.sequence)?;
    verify(&first.sequence, &second.sequence)?;
    Ok(())
}

#[test]
fn test_report_summary() -> Result<()> {
    let original = literals("Summary::run", &[1, 70_000, 2])?;
    let output = obfuscate(&original, &Policy::light())?;
    let report = &output.report;

    assert_eq!(report.original_len, 7);
    assert_eq!(report.rewritten_len, 7 + report.total_growth());
    assert_eq!(report.strategy_usage().values().sum::<usize>(), 2);
    assert_eq!(
        report.summary(),
        format!(
            "Summary::run: 2 rewritten, 0 failed, 0 skipped, 7 -> {} instructions",
            report.rewritten_len
        )
    );
    Ok(())
}
