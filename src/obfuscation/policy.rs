//! Configuration for the obfuscation engine.
//!
//! This module provides the [`Policy`] that controls strategy selection, nesting, retry
//! behavior and determinism of an obfuscation pass.

use std::collections::BTreeSet;

use crate::{Error, Result};

/// What the engine does when a site exhausts its retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureAction {
    /// Keep the original literal load, record the failure and continue with the next site.
    #[default]
    LeaveUnobfuscated,
    /// Abort the whole call with [`Error::ObfuscationFailed`].
    Abort,
}

/// Configuration for one obfuscation pass.
///
/// Two passes over the same sequence with equal policies (including the seed) produce
/// identical output.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    /// Maximum depth of the strategy tree per site (default: 2).
    ///
    /// Depth 1 means every site is rewritten by a single strategy without nesting. Strategies
    /// that would need a nested operand to hide the target are passed over at depth 1.
    pub max_nesting_depth: u32,

    /// Names of the strategies the selector may use; `None` allows every registered one.
    pub allowed_strategies: Option<BTreeSet<String>>,

    /// Maximum number of plans tried per site (default: 8).
    pub retry_budget_per_site: u32,

    /// Seed of the pseudo-random source (default: 0).
    pub random_seed: u64,

    /// Probability that an eligible operand is nested while depth remains (default: 0.5).
    pub nesting_probability: f64,

    /// Upper bound on the instruction count a single site may expand to.
    pub max_site_growth: Option<usize>,

    /// Behavior for sites that cannot be rewritten.
    pub on_failure: FailureAction,

    /// Leave literals that directly feed a conditional branch or switch untouched.
    pub skip_branch_operands: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_nesting_depth: 2,
            allowed_strategies: None,
            retry_budget_per_site: 8,
            random_seed: 0,
            nesting_probability: 0.5,
            max_site_growth: None,
            on_failure: FailureAction::LeaveUnobfuscated,
            skip_branch_operands: false,
        }
    }
}

impl Policy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a "light" policy for small output.
    ///
    /// This policy uses:
    /// - No voluntary nesting (depth 1)
    /// - At most 32 instructions per site
    #[must_use]
    pub fn light() -> Self {
        Self {
            max_nesting_depth: 1,
            nesting_probability: 0.0,
            max_site_growth: Some(32),
            ..Self::default()
        }
    }

    /// Creates a "strong" policy for maximum resistance to static recovery.
    ///
    /// This policy uses:
    /// - Depth 3 trees
    /// - Nesting of most eligible operands
    /// - A larger retry budget
    #[must_use]
    pub fn strong() -> Self {
        Self {
            max_nesting_depth: 3,
            nesting_probability: 0.8,
            retry_budget_per_site: 16,
            ..Self::default()
        }
    }

    /// Sets the random seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    /// Sets the maximum nesting depth.
    #[must_use]
    pub fn with_max_nesting_depth(mut self, depth: u32) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    /// Restricts selection to the named strategies.
    ///
    /// # Arguments
    ///
    /// * `names` - Strategy names as reported by [`crate::strategy::ConstantStrategy::name`].
    ///
    /// # Returns
    ///
    /// The modified policy (builder pattern).
    #[must_use]
    pub fn with_allowed_strategies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_strategies = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the per-site retry budget.
    #[must_use]
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget_per_site = budget;
        self
    }

    /// Sets the probability of nesting an eligible operand.
    #[must_use]
    pub fn with_nesting_probability(mut self, probability: f64) -> Self {
        self.nesting_probability = probability;
        self
    }

    /// Limits the number of instructions a single site may expand to.
    #[must_use]
    pub fn with_max_site_growth(mut self, limit: usize) -> Self {
        self.max_site_growth = Some(limit);
        self
    }

    /// Sets the behavior for sites that exhaust their retry budget.
    #[must_use]
    pub fn with_failure_action(mut self, action: FailureAction) -> Self {
        self.on_failure = action;
        self
    }

    /// Enables or disables skipping of literals that feed branches.
    #[must_use]
    pub fn with_skip_branch_operands(mut self, skip: bool) -> Self {
        self.skip_branch_operands = skip;
        self
    }

    /// Returns `true` if `name` may be selected.
    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        self.allowed_strategies
            .as_ref()
            .map_or(true, |allowed| allowed.contains(name))
    }

    /// Checks every field for its valid range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPolicy`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_nesting_depth == 0 {
            return Err(Error::InvalidPolicy(
                "max_nesting_depth must be at least 1".to_string(),
            ));
        }
        if self.retry_budget_per_site == 0 {
            return Err(Error::InvalidPolicy(
                "retry_budget_per_site must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.nesting_probability) {
            return Err(Error::InvalidPolicy(format!(
                "nesting_probability {} is outside [0, 1]",
                self.nesting_probability
            )));
        }
        if self.max_site_growth == Some(0) {
            return Err(Error::InvalidPolicy(
                "max_site_growth must be at least 1".to_string(),
            ));
        }
        if let Some(allowed) = &self.allowed_strategies {
            if allowed.is_empty() {
                return Err(Error::InvalidPolicy(
                    "allowed_strategies must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
