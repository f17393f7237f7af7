//! The rewrite engine.
//!
//! [`ObfuscationEngine`] walks a sequence front to back, rewriting every eligible literal
//! load in place. For each site it asks the [`StrategySelector`] for a plan, checks the plan
//! (stack shape, leaks, size, concrete value) and retries with a fresh plan on recoverable
//! failures until the site's budget is spent. Accepted plans are spliced into the sequence
//! immediately, so later sites are found at shifted positions; the engine tracks the
//! accumulated growth to report every site under its original position.
//!
//! # Determinism
//!
//! All randomness comes from one [`StdRng`] per sequence, seeded from the policy's seed
//! mixed with the sequence identity. The same input and policy always produce the same
//! output, including in [`ObfuscationEngine::obfuscate_all`], where sequences are processed
//! in parallel.
//!
//! # Cancellation
//!
//! A cancellation flag installed with [`ObfuscationEngine::with_cancellation`] is checked
//! before every site. A cancelled pass returns [`Error::Cancelled`] and its partial result
//! is discarded; the input is never modified.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::{
    analysis::StackAnalyzer,
    assembly::{AuxAllocator, FlowType, InstructionSequence, RewrittenRegion, SequenceId},
    obfuscation::{
        plan::RewritePlan,
        report::{ObfuscationReport, SiteOutcome, SiteStatus},
        selector::StrategySelector,
        verifier::verify_plan,
        FailureAction, Policy,
    },
    strategy::{StrategyContext, StrategyPool},
    Error, Result,
};

/// A literal load selected for rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObfuscationSite {
    /// Position in the sequence as currently rewritten
    pub position: usize,
    /// Position in the input sequence
    pub original_position: usize,
    /// The literal value
    pub value: i16,
}

/// A rewritten sequence and the report describing how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ObfuscationOutput {
    /// The rewritten sequence
    pub sequence: InstructionSequence,
    /// Per-site outcomes
    pub report: ObfuscationReport,
}

enum SiteResult {
    Rewritten { plan: RewritePlan, attempts: u32 },
    Failed(Error),
}

/// Applies a [`Policy`] with a [`StrategyPool`] to instruction sequences.
#[derive(Debug, Clone)]
pub struct ObfuscationEngine {
    policy: Policy,
    pool: Arc<StrategyPool>,
    cancel: Option<Arc<AtomicBool>>,
}

impl ObfuscationEngine {
    /// Creates an engine with the built-in strategies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPolicy`] if the policy is out of range or names a strategy
    /// that is not registered.
    pub fn new(policy: Policy) -> Result<Self> {
        Self::with_pool(policy, StrategyPool::builtin())
    }

    /// Creates an engine drawing from a custom pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPolicy`] if the policy is out of range, names a strategy
    /// that is not in `pool`, or leaves no strategy to choose from.
    pub fn with_pool(policy: Policy, pool: StrategyPool) -> Result<Self> {
        policy.validate()?;
        if let Some(allowed) = &policy.allowed_strategies {
            if let Some(unknown) = allowed.iter().find(|name| pool.get(name).is_none()) {
                return Err(Error::InvalidPolicy(format!("unknown strategy '{unknown}'")));
            }
        }
        if pool.is_empty() {
            return Err(Error::InvalidPolicy("strategy pool is empty".to_string()));
        }

        Ok(ObfuscationEngine {
            policy,
            pool: Arc::new(pool),
            cancel: None,
        })
    }

    /// Installs a flag that aborts running passes when set.
    #[must_use]
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// The strategy pool.
    #[must_use]
    pub fn pool(&self) -> &StrategyPool {
        &self.pool
    }

    /// Obfuscates one sequence.
    ///
    /// # Errors
    ///
    /// - [`Error::StackUnderflow`] / [`Error::StackImbalance`] if a strategy is defective
    /// - [`Error::ObfuscationFailed`] if a site fails and the policy says
    ///   [`FailureAction::Abort`]
    /// - [`Error::Cancelled`] if the cancellation flag was set
    pub fn process(&self, sequence: &InstructionSequence) -> Result<ObfuscationOutput> {
        let mut rng = StdRng::seed_from_u64(self.policy.random_seed ^ sequence_hash(sequence.id()));
        let mut aux = AuxAllocator::after(sequence.auxiliary_data());
        let selector = StrategySelector::new(&self.pool, &self.policy);

        let mut output = sequence.clone();
        let mut report = ObfuscationReport::new(sequence.id().clone(), sequence.len());
        let mut position = 0;
        let mut growth = 0;

        while position < output.len() {
            self.check_cancelled()?;

            let Some(site) = Self::site_at(&output, position, growth) else {
                position += 1;
                continue;
            };

            if self.policy.skip_branch_operands && Self::feeds_branch(&output, position) {
                report.sites.push(SiteOutcome {
                    position: site.original_position,
                    value: site.value,
                    status: SiteStatus::Skipped {
                        reason: "operand of a conditional branch".to_string(),
                    },
                });
                position += 1;
                continue;
            }

            let mut ctx = StrategyContext::new(&mut rng, &mut aux);
            match self.rewrite_site(&selector, &site, &mut ctx)? {
                SiteResult::Rewritten { plan, attempts } => {
                    let strategy = plan.render();
                    let depth = plan.depth();
                    let (instructions, auxiliary) = plan.into_parts();
                    let len = instructions.len();
                    let delta = output.splice(site.position, instructions)?;
                    output.mark_region(RewrittenRegion {
                        start: site.position,
                        len,
                        value: site.value,
                        strategy: strategy.clone(),
                    });
                    output.extend_auxiliary(auxiliary);

                    debug!(
                        sequence = %sequence.id(),
                        position = site.original_position,
                        value = site.value,
                        strategy = %strategy,
                        depth,
                        attempts,
                        "site rewritten"
                    );
                    report.sites.push(SiteOutcome {
                        position: site.original_position,
                        value: site.value,
                        status: SiteStatus::Rewritten {
                            strategy,
                            depth,
                            attempts,
                            growth: delta,
                        },
                    });
                    growth += delta;
                    position += len;
                }
                SiteResult::Failed(error) => match self.policy.on_failure {
                    FailureAction::Abort => return Err(error),
                    FailureAction::LeaveUnobfuscated => {
                        warn!(sequence = %sequence.id(), error = %error, "site left unobfuscated");
                        report.sites.push(SiteOutcome {
                            position: site.original_position,
                            value: site.value,
                            status: SiteStatus::Failed {
                                error,
                                attempts: self.policy.retry_budget_per_site,
                            },
                        });
                        position += 1;
                    }
                },
            }
        }

        report.rewritten_len = output.len();
        info!("{}", report.summary());
        Ok(ObfuscationOutput {
            sequence: output,
            report,
        })
    }

    /// Obfuscates independent sequences in parallel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateSequence`] if two sequences share an identity, or the
    /// first error of any [`Self::process`] call.
    pub fn obfuscate_all(
        &self,
        sequences: &[InstructionSequence],
    ) -> Result<BTreeMap<SequenceId, ObfuscationOutput>> {
        let mut seen = BTreeSet::new();
        for sequence in sequences {
            if !seen.insert(sequence.id()) {
                return Err(Error::DuplicateSequence(sequence.id().to_string()));
            }
        }

        sequences
            .par_iter()
            .map(|sequence| Ok((sequence.id().clone(), self.process(sequence)?)))
            .collect()
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    /// Returns the site at `position` if it holds a 16-bit literal outside any rewrite.
    fn site_at(sequence: &InstructionSequence, position: usize, growth: usize) -> Option<ObfuscationSite> {
        if sequence.is_rewritten(position) {
            return None;
        }
        let value = sequence.get(position)?.int_literal()?;
        Some(ObfuscationSite {
            position,
            original_position: position - growth,
            value: i16::try_from(value).ok()?,
        })
    }

    fn feeds_branch(sequence: &InstructionSequence, position: usize) -> bool {
        sequence.get(position + 1).is_some_and(|next| {
            matches!(next.flow_type(), FlowType::ConditionalBranch | FlowType::Switch)
        })
    }

    fn rewrite_site(
        &self,
        selector: &StrategySelector<'_>,
        site: &ObfuscationSite,
        ctx: &mut StrategyContext<'_>,
    ) -> Result<SiteResult> {
        let budget = self.policy.retry_budget_per_site;
        let mut failed_roots = BTreeSet::new();
        let mut last = None;

        for attempt in 1..=budget {
            let plan = match selector.plan(site, &failed_roots, ctx) {
                Ok(plan) => plan,
                Err(e) if e.is_recoverable() => {
                    debug!(position = site.original_position, attempt, error = %e, "no plan");
                    last = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self.check_plan(&plan) {
                Ok(()) => return Ok(SiteResult::Rewritten { plan, attempts: attempt }),
                Err(e) if e.is_recoverable() => {
                    debug!(
                        position = site.original_position,
                        attempt,
                        strategy = %plan.render(),
                        error = %e,
                        "plan rejected"
                    );
                    failed_roots.insert(plan.root_strategy().to_string());
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let last = last.unwrap_or_else(|| Error::InvalidPolicy("retry budget is zero".to_string()));
        Ok(SiteResult::Failed(Error::ObfuscationFailed {
            position: site.original_position,
            value: i64::from(site.value),
            attempts: budget,
            last: Box::new(last),
        }))
    }

    /// Checks a plan before it is applied.
    ///
    /// Stack defects are fatal; leaks, size violations and value mismatches are recoverable.
    fn check_plan(&self, plan: &RewritePlan) -> Result<()> {
        StackAnalyzer::for_strategy(plan.render()).validate_replacement(plan.instructions())?;

        if plan.leaks() {
            return Err(Error::ImmediateLeak {
                strategy: plan.root_strategy().to_string(),
                value: i64::from(plan.target),
            });
        }

        if let Some(limit) = self.policy.max_site_growth {
            let len = plan.instructions().len();
            if len > limit {
                return Err(Error::ExcessiveGrowth {
                    strategy: plan.root_strategy().to_string(),
                    len,
                    limit,
                });
            }
        }

        verify_plan(plan)
    }
}

/// FNV-1a over the sequence identity.
fn sequence_hash(id: &SequenceId) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    id.0.bytes().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    })
}

/// Obfuscates every eligible literal of `sequence` under `policy` with the built-in
/// strategies.
///
/// # Errors
///
/// See [`ObfuscationEngine::new`] and [`ObfuscationEngine::process`].
///
/// # Examples
///
/// ```rust
/// use litcloak::{obfuscate, verify, Policy};
/// use litcloak::assembly::SequenceBuilder;
///
/// let mut builder = SequenceBuilder::new("answer");
/// builder.push_int(42)?.ret_value()?;
/// let sequence = builder.build()?;
///
/// let output = obfuscate(&sequence, &Policy::default().with_seed(3))?;
/// assert_eq!(output.report.rewritten_count(), 1);
/// verify(&sequence, &output.sequence)?;
/// # Ok::<(), litcloak::Error>(())
/// ```
pub fn obfuscate(sequence: &InstructionSequence, policy: &Policy) -> Result<ObfuscationOutput> {
    ObfuscationEngine::new(policy.clone())?.process(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{Instruction, Opcode, SequenceBuilder},
        obfuscation::verify,
    };

    fn literals(values: &[i32]) -> InstructionSequence {
        let mut builder = SequenceBuilder::new("literals");
        for &value in values {
            builder.push_int(value).unwrap();
            builder.simple(Opcode::Pop).unwrap();
        }
        builder.ret().unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_sequence_hash_is_stable() {
        assert_eq!(sequence_hash(&SequenceId::from("")), 0xcbf2_9ce4_8422_2325);
        assert_ne!(
            sequence_hash(&SequenceId::from("a")),
            sequence_hash(&SequenceId::from("b"))
        );
    }

    #[test]
    fn test_only_short_literals_are_sites() {
        let input = literals(&[7, 70_000, -32768, 32768]);
        let output = obfuscate(&input, &Policy::default()).unwrap();
        let positions: Vec<usize> = output.report.sites.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0, 4]);
        assert!(output
            .sequence
            .instructions()
            .contains(&Instruction::iconst(70_000)));
        verify(&input, &output.sequence).unwrap();
    }

    #[test]
    fn test_original_positions_survive_growth() {
        let input = literals(&[1, 2, 3]);
        let output = obfuscate(&input, &Policy::default().with_seed(5)).unwrap();
        let positions: Vec<usize> = output.report.sites.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0, 2, 4]);
        assert_eq!(output.report.rewritten_len, output.sequence.len());
        assert_eq!(output.sequence.regions().len(), 3);
    }

    #[test]
    fn test_second_pass_leaves_regions_alone() {
        let input = literals(&[100]);
        let first = obfuscate(&input, &Policy::default()).unwrap();
        let second = obfuscate(&first.sequence, &Policy::default().with_seed(1)).unwrap();
        assert_eq!(second.sequence, first.sequence);
        assert_eq!(second.report.rewritten_count(), 0);
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let policy = Policy::default().with_allowed_strategies(["no-such-strategy"]);
        assert!(matches!(
            ObfuscationEngine::new(policy),
            Err(Error::InvalidPolicy(_))
        ));
        assert!(matches!(
            ObfuscationEngine::with_pool(Policy::default(), StrategyPool::empty()),
            Err(Error::InvalidPolicy(_))
        ));
    }

    #[test]
    fn test_cancelled_before_first_site() {
        let flag = Arc::new(AtomicBool::new(true));
        let engine = ObfuscationEngine::new(Policy::default())
            .unwrap()
            .with_cancellation(flag);
        assert_eq!(engine.process(&literals(&[1])), Err(Error::Cancelled));
    }
}
