//! Strategy selection and composition.
//!
//! The [`StrategySelector`] turns a literal site into a [`RewritePlan`]. It picks a root
//! strategy at random from the allowed candidates, expands it, and then decides for every
//! literal operand of the expansion whether to keep it or to replace it with the plan of a
//! further strategy:
//!
//! - operands equal to the site's value must be nested (they would leak it), using a strategy
//!   that does not itself embed its target; at the last level of depth such a candidate is
//!   rejected with [`Error::ImmediateLeak`] and the next one is tried
//! - other 16-bit operands are nested with the policy's nesting probability while depth
//!   remains, at least one per node
//! - a child never uses the same strategy as its parent
//!
//! Recoverable failures of one candidate move on to the next one; strategy defects found by
//! the stack analyzer abort selection.

use std::{collections::BTreeSet, sync::Arc};

use rand::{seq::SliceRandom, Rng};
use tracing::trace;

use crate::{
    analysis::StackAnalyzer,
    obfuscation::{
        plan::{PlanNode, PlanPart, RewritePlan},
        ObfuscationSite, Policy,
    },
    strategy::{ConstantStrategy, Expansion, Fragment, StrategyContext, StrategyPool},
    Error, Result,
};

/// Builds strategy trees for literal sites.
pub struct StrategySelector<'a> {
    pool: &'a StrategyPool,
    policy: &'a Policy,
}

/// Constraints for building one node.
#[derive(Clone, Copy)]
struct NodeRequest<'n> {
    target: i16,
    depth: u32,
    parent: Option<&'n str>,
    forced: bool,
}

impl<'a> StrategySelector<'a> {
    /// Creates a selector drawing from `pool` under `policy`.
    #[must_use]
    pub fn new(pool: &'a StrategyPool, policy: &'a Policy) -> Self {
        StrategySelector { pool, policy }
    }

    /// Strategies the policy allows, in registration order.
    pub fn candidates(&self) -> impl Iterator<Item = &'a Arc<dyn ConstantStrategy>> + '_ {
        self.pool.iter().filter(|s| self.policy.allows(s.name()))
    }

    /// Builds a plan for `site`.
    ///
    /// Root strategies listed in `failed_roots` are avoided unless every allowed strategy
    /// has already failed, in which case all of them are tried again.
    ///
    /// # Errors
    ///
    /// Returns the last recoverable error if no candidate produced a plan, or a strategy
    /// defect ([`Error::StackUnderflow`], [`Error::StackImbalance`]) immediately.
    pub fn plan(
        &self,
        site: &ObfuscationSite,
        failed_roots: &BTreeSet<String>,
        ctx: &mut StrategyContext<'_>,
    ) -> Result<RewritePlan> {
        let exhausted = self.candidates().all(|s| failed_roots.contains(s.name()));
        let avoid = if exhausted {
            BTreeSet::new()
        } else {
            failed_roots.clone()
        };

        let request = NodeRequest {
            target: site.value,
            depth: self.policy.max_nesting_depth,
            parent: None,
            forced: false,
        };
        let root = self.build_node(request, site.value, &avoid, ctx)?;
        Ok(RewritePlan::new(site.position, site.value, root))
    }

    fn build_node(
        &self,
        request: NodeRequest<'_>,
        root: i16,
        avoid: &BTreeSet<String>,
        ctx: &mut StrategyContext<'_>,
    ) -> Result<PlanNode> {
        let mut candidates: Vec<&Arc<dyn ConstantStrategy>> = self
            .candidates()
            .filter(|s| Some(s.name()) != request.parent)
            .filter(|s| !(request.forced && s.embeds_target()))
            .filter(|s| !avoid.contains(s.name()))
            .collect();
        candidates.shuffle(&mut *ctx.rng);

        let mut last = None;
        for strategy in candidates {
            let attempt = strategy.expand(request.target, ctx).and_then(|expansion| {
                StackAnalyzer::for_strategy(strategy.name())
                    .validate_replacement(&expansion.instructions())?;
                self.compose(expansion, request, root, ctx)
            });
            match attempt {
                Ok(node) => return Ok(node),
                Err(e) if e.is_recoverable() => {
                    trace!(strategy = strategy.name(), target = request.target, error = %e, "candidate rejected");
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last.unwrap_or_else(|| Error::UnsupportedWidth {
            value: i64::from(request.target),
            strategy: "no eligible strategy".to_string(),
        }))
    }

    fn compose(
        &self,
        expansion: Expansion,
        request: NodeRequest<'_>,
        root: i16,
        ctx: &mut StrategyContext<'_>,
    ) -> Result<PlanNode> {
        let (strategy, fragments, auxiliary) = expansion.into_parts();
        let root_value = i32::from(root);

        // Operands that may be nested voluntarily
        let eligible: Vec<usize> = fragments
            .iter()
            .enumerate()
            .filter_map(|(index, fragment)| match fragment {
                Fragment::Literal(value)
                    if *value != root_value && i16::try_from(*value).is_ok() =>
                {
                    Some(index)
                }
                _ => None,
            })
            .collect();

        let mut chosen = BTreeSet::new();
        if request.depth > 1 && self.policy.nesting_probability > 0.0 && !eligible.is_empty() {
            for &index in &eligible {
                if ctx.rng.random_bool(self.policy.nesting_probability) {
                    chosen.insert(index);
                }
            }
            if chosen.is_empty() {
                chosen.insert(eligible[ctx.rng.random_range(0..eligible.len())]);
            }
        }

        let mut parts = Vec::with_capacity(fragments.len());
        for (index, fragment) in fragments.into_iter().enumerate() {
            let part = match fragment {
                Fragment::Instruction(instr) => PlanPart::Instruction(instr),
                Fragment::Literal(value) if value == root_value => {
                    if request.depth <= 1 {
                        return Err(Error::ImmediateLeak {
                            strategy,
                            value: i64::from(root),
                        });
                    }
                    let child = NodeRequest {
                        target: root,
                        depth: request.depth - 1,
                        parent: Some(strategy.as_str()),
                        forced: true,
                    };
                    PlanPart::Operand(self.build_node(child, root, &BTreeSet::new(), ctx)?)
                }
                Fragment::Literal(value) => match i16::try_from(value) {
                    Ok(target) if chosen.contains(&index) => {
                        let child = NodeRequest {
                            target,
                            depth: request.depth - 1,
                            parent: Some(strategy.as_str()),
                            forced: false,
                        };
                        match self.build_node(child, root, &BTreeSet::new(), ctx) {
                            Ok(node) => PlanPart::Operand(node),
                            Err(e) if e.is_recoverable() => {
                                PlanPart::Operand(PlanNode::Literal(value))
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    _ => PlanPart::Operand(PlanNode::Literal(value)),
                },
            };
            parts.push(part);
        }

        Ok(PlanNode::Strategy {
            strategy,
            target: request.target,
            parts,
            auxiliary,
        })
    }
}
