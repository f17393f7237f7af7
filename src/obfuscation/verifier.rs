//! Equivalence checking of rewritten sequences.
//!
//! Verification does not trust the engine. It aligns the rewritten sequence with the
//! original using the recorded [`RewrittenRegion`]s, then checks:
//!
//! 1. every new region replaces an integer literal load of the value it claims
//! 2. every region, executed in isolation on the simulator with the sequence's auxiliary
//!    declarations, pushes exactly that value and nothing else
//! 3. every other instruction is unchanged apart from renumbered branch targets
//! 4. exception handlers, earlier regions and auxiliary declarations are preserved
//! 5. a sequence that was stack-consistent before is still stack-consistent
//!
//! Any difference is reported as [`Error::RewriteMismatch`].

use crate::{
    analysis::{StackAnalyzer, StackEffect},
    assembly::{InstructionSequence, RewrittenRegion},
    emulation::{EmValue, StackMachine},
    obfuscation::plan::RewritePlan,
    Error, Result,
};

/// Evaluates a plan in isolation and compares its result with the site's value.
///
/// Only the plan's own auxiliary declarations are visible.
pub(crate) fn verify_plan(plan: &RewritePlan) -> Result<()> {
    let expected = EmValue::I32(i32::from(plan.target));
    match StackMachine::evaluate(plan.instructions(), plan.auxiliary()) {
        Ok(values) if values == [expected] => Ok(()),
        Ok(values) => Err(Error::RewriteMismatch {
            position: plan.position,
            strategy: Some(plan.render()),
            expected: Some(i64::from(plan.target)),
            actual: single_value(&values),
            reason: if values.len() == 1 {
                "replacement computes a different value".to_string()
            } else {
                format!("replacement left {} values", values.len())
            },
        }),
        Err(e) => Err(Error::RewriteMismatch {
            position: plan.position,
            strategy: Some(plan.render()),
            expected: Some(i64::from(plan.target)),
            actual: None,
            reason: e.to_string(),
        }),
    }
}

fn single_value(values: &[EmValue]) -> Option<i64> {
    match values {
        [value] => value.as_i64(),
        _ => None,
    }
}

fn structural(position: usize, reason: impl Into<String>) -> Error {
    Error::RewriteMismatch {
        position,
        strategy: None,
        expected: None,
        actual: None,
        reason: reason.into(),
    }
}

/// Checks that `rewritten` is a semantically equivalent rewrite of `original`.
///
/// `rewritten` must have been produced from `original` by the engine (or by further passes
/// of it): regions it records that `original` does not are treated as the replacements of
/// single literal loads.
///
/// # Errors
///
/// Returns [`Error::RewriteMismatch`] describing the first difference found.
///
/// # Examples
///
/// ```rust
/// use litcloak::{obfuscate, verify, Policy, Error};
/// use litcloak::assembly::SequenceBuilder;
///
/// let mut builder = SequenceBuilder::new("m");
/// builder.push_int(9999)?.ret_value()?;
/// let original = builder.build()?;
///
/// let output = obfuscate(&original, &Policy::default())?;
/// verify(&original, &output.sequence)?;
///
/// // A sequence is not a rewrite of an unrelated one
/// let mut other = SequenceBuilder::new("m");
/// other.push_int(1)?.ret_value()?;
/// assert!(matches!(
///     verify(&other.build()?, &output.sequence),
///     Err(Error::RewriteMismatch { .. })
/// ));
/// # Ok::<(), litcloak::Error>(())
/// ```
pub fn verify(original: &InstructionSequence, rewritten: &InstructionSequence) -> Result<()> {
    let (mapping, sites) = align(original, rewritten)?;
    let remap = |target: usize| mapping.get(target).copied().unwrap_or(usize::MAX);

    for (position, instr) in original.instructions().iter().enumerate() {
        let start = mapping[position];
        if let Some(region) = sites.iter().find(|region| region.start == start) {
            verify_region(original, rewritten, position, region)?;
            continue;
        }

        let mut expected = instr.clone();
        expected.remap_targets(remap);
        if rewritten.get(start) != Some(&expected) {
            return Err(structural(
                position,
                format!(
                    "expected '{expected}' at {start}, found '{}'",
                    rewritten
                        .get(start)
                        .map_or_else(|| "nothing".to_string(), ToString::to_string)
                ),
            ));
        }
    }

    let handlers: Vec<_> = original
        .handlers()
        .iter()
        .map(|handler| {
            let mut handler = *handler;
            handler.remap(remap);
            handler
        })
        .collect();
    if handlers != rewritten.handlers() {
        return Err(structural(0, "exception handlers differ"));
    }

    for region in original.regions() {
        let moved = RewrittenRegion {
            start: remap(region.start),
            ..region.clone()
        };
        if !rewritten.regions().contains(&moved) {
            return Err(structural(region.start, "earlier rewrite region was lost"));
        }
    }

    if !rewritten
        .auxiliary_data()
        .starts_with(original.auxiliary_data())
    {
        return Err(structural(0, "auxiliary declarations were not preserved"));
    }

    let analyzer = StackAnalyzer::new();
    if analyzer.analyze_sequence(original).is_ok() {
        if let Err(e) = analyzer.analyze_sequence(rewritten) {
            return Err(structural(0, format!("rewritten sequence is inconsistent: {e}")));
        }
    }

    Ok(())
}

/// Maps every original position (and the end position) to its rewritten position, and
/// collects the regions that are new in `rewritten`.
fn align<'r>(
    original: &InstructionSequence,
    rewritten: &'r InstructionSequence,
) -> Result<(Vec<usize>, Vec<&'r RewrittenRegion>)> {
    let mut mapping = Vec::with_capacity(original.len() + 1);
    let mut sites = Vec::new();
    let mut j = 0;

    for i in 0..original.len() {
        if j >= rewritten.len() {
            return Err(structural(i, "rewritten sequence ends early"));
        }
        mapping.push(j);
        match rewritten.region_at(j) {
            Some(region) if original.region_at(i).is_none() && region.len > 0 => {
                sites.push(region);
                j += region.len;
            }
            _ => j += 1,
        }
    }

    if j != rewritten.len() {
        return Err(structural(
            original.len(),
            format!("{} unexplained trailing instructions", rewritten.len().saturating_sub(j)),
        ));
    }
    mapping.push(j);
    Ok((mapping, sites))
}

fn verify_region(
    original: &InstructionSequence,
    rewritten: &InstructionSequence,
    position: usize,
    region: &RewrittenRegion,
) -> Result<()> {
    let literal = original.get(position).and_then(|instr| instr.int_literal());
    if literal != Some(i32::from(region.value)) {
        return Err(Error::RewriteMismatch {
            position,
            strategy: Some(region.strategy.clone()),
            expected: literal.map(i64::from),
            actual: Some(i64::from(region.value)),
            reason: "region does not replace a literal of its value".to_string(),
        });
    }

    let code = &rewritten.instructions()[region.start..region.start + region.len];
    if !StackEffect::of(code).is_int_push() {
        return Err(Error::RewriteMismatch {
            position,
            strategy: Some(region.strategy.clone()),
            expected: Some(i64::from(region.value)),
            actual: None,
            reason: "region does not push exactly one integer".to_string(),
        });
    }

    let values = StackMachine::evaluate(code, rewritten.auxiliary_data()).map_err(|e| {
        Error::RewriteMismatch {
            position,
            strategy: Some(region.strategy.clone()),
            expected: Some(i64::from(region.value)),
            actual: None,
            reason: e.to_string(),
        }
    })?;
    if values != [EmValue::I32(i32::from(region.value))] {
        return Err(Error::RewriteMismatch {
            position,
            strategy: Some(region.strategy.clone()),
            expected: Some(i64::from(region.value)),
            actual: single_value(&values),
            reason: "region computes a different value".to_string(),
        });
    }
    Ok(())
}
