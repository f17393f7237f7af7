//! Per-site outcomes and summary statistics of an obfuscation pass.

use std::{collections::BTreeMap, fmt};

use crate::{assembly::SequenceId, Error};

/// What happened at one literal site.
#[derive(Debug, Clone, PartialEq)]
pub enum SiteStatus {
    /// The literal was replaced.
    Rewritten {
        /// Rendered strategy tree
        strategy: String,
        /// Depth of the strategy tree
        depth: u32,
        /// Attempts needed, including the successful one
        attempts: u32,
        /// Instructions added by the replacement
        growth: usize,
    },
    /// Every attempt failed and the literal was left in place.
    Failed {
        /// The [`Error::ObfuscationFailed`] describing the last attempt
        error: Error,
        /// Attempts made
        attempts: u32,
    },
    /// The literal was not considered.
    Skipped {
        /// Why the site was skipped
        reason: String,
    },
}

/// Outcome of one site, keyed by its position in the original sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteOutcome {
    /// Position of the literal load in the original sequence
    pub position: usize,
    /// The literal value
    pub value: i16,
    /// What happened
    pub status: SiteStatus,
}

/// Result summary of one obfuscated sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ObfuscationReport {
    /// Identity of the processed sequence
    pub sequence: SequenceId,
    /// Every eligible or skipped site, in original order
    pub sites: Vec<SiteOutcome>,
    /// Instruction count before the pass
    pub original_len: usize,
    /// Instruction count after the pass
    pub rewritten_len: usize,
}

impl ObfuscationReport {
    pub(crate) fn new(sequence: SequenceId, original_len: usize) -> Self {
        ObfuscationReport {
            sequence,
            sites: Vec::new(),
            original_len,
            rewritten_len: original_len,
        }
    }

    /// Number of sites that were replaced.
    #[must_use]
    pub fn rewritten_count(&self) -> usize {
        self.count(|status| matches!(status, SiteStatus::Rewritten { .. }))
    }

    /// Number of sites left unobfuscated after exhausting their budget.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(|status| matches!(status, SiteStatus::Failed { .. }))
    }

    /// Number of sites skipped by policy.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.count(|status| matches!(status, SiteStatus::Skipped { .. }))
    }

    /// Instructions added by all rewrites together.
    #[must_use]
    pub fn total_growth(&self) -> usize {
        self.rewritten_len.saturating_sub(self.original_len)
    }

    /// How often each root strategy was used.
    #[must_use]
    pub fn strategy_usage(&self) -> BTreeMap<String, usize> {
        let mut usage = BTreeMap::new();
        for site in &self.sites {
            if let SiteStatus::Rewritten { strategy, .. } = &site.status {
                let root = strategy.split('(').next().unwrap_or(strategy);
                *usage.entry(root.to_string()).or_insert(0) += 1;
            }
        }
        usage
    }

    /// One-line summary for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{}: {} rewritten, {} failed, {} skipped, {} -> {} instructions",
            self.sequence,
            self.rewritten_count(),
            self.failed_count(),
            self.skipped_count(),
            self.original_len,
            self.rewritten_len
        )
    }

    fn count(&self, predicate: impl Fn(&SiteStatus) -> bool) -> usize {
        self.sites.iter().filter(|site| predicate(&site.status)).count()
    }
}

impl fmt::Display for ObfuscationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        for site in &self.sites {
            match &site.status {
                SiteStatus::Rewritten {
                    strategy,
                    attempts,
                    growth,
                    ..
                } => writeln!(
                    f,
                    "  @{:<5} {:>6} -> {strategy} (+{growth}, {attempts} attempts)",
                    site.position, site.value
                )?,
                SiteStatus::Failed { error, .. } => {
                    writeln!(f, "  @{:<5} {:>6} !! {error}", site.position, site.value)?;
                }
                SiteStatus::Skipped { reason } => {
                    writeln!(f, "  @{:<5} {:>6} -- {reason}", site.position, site.value)?;
                }
            }
        }
        Ok(())
    }
}
