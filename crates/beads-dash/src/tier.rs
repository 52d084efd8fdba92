use beads_core::{Issue, IssueStatus};
use std::fmt;

pub const DEFAULT_LARGE_THRESHOLD: usize = 5_000;
pub const DEFAULT_HUGE_THRESHOLD: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DatasetTier {
    #[default]
    Normal,
    Large,
    Huge,
}

impl DatasetTier {
    pub fn as_str(self) -> &'static str {
        match self {
            DatasetTier::Normal => "normal",
            DatasetTier::Large => "large",
            DatasetTier::Huge => "huge",
        }
    }
}

impl fmt::Display for DatasetTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size thresholds and the reduced load applied to huge datasets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierPolicy {
    pub large_threshold: usize,
    pub huge_threshold: usize,
    /// Statuses dropped while loading a huge dataset.
    pub huge_excluded: Vec<IssueStatus>,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            large_threshold: DEFAULT_LARGE_THRESHOLD,
            huge_threshold: DEFAULT_HUGE_THRESHOLD,
            huge_excluded: vec![IssueStatus::Closed, IssueStatus::Tombstone],
        }
    }
}

/// How a load was shaped by its tier.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TierOutcome {
    pub tier: DatasetTier,
    pub source_issue_count_hint: usize,
    pub loaded_open_only: bool,
    pub truncated: usize,
    pub warning: Option<String>,
}

impl TierPolicy {
    pub fn classify(&self, hint: usize) -> DatasetTier {
        if hint >= self.huge_threshold {
            DatasetTier::Huge
        } else if hint >= self.large_threshold {
            DatasetTier::Large
        } else {
            DatasetTier::Normal
        }
    }

    pub fn retains(&self, issue: &Issue) -> bool {
        !self.huge_excluded.contains(&issue.status)
    }

    pub fn outcome(&self, tier: DatasetTier, hint: usize, retained: usize) -> TierOutcome {
        match tier {
            DatasetTier::Normal => TierOutcome {
                tier,
                source_issue_count_hint: hint,
                ..TierOutcome::default()
            },
            DatasetTier::Large => TierOutcome {
                tier,
                source_issue_count_hint: hint,
                loaded_open_only: false,
                truncated: 0,
                warning: Some(format!(
                    "large dataset ({hint} issues): loading everything, views may lag"
                )),
            },
            DatasetTier::Huge => {
                let truncated = hint.saturating_sub(retained);
                TierOutcome {
                    tier,
                    source_issue_count_hint: hint,
                    loaded_open_only: true,
                    truncated,
                    warning: Some(format!(
                        "huge dataset ({hint} issues): loaded open-only, {truncated} hidden"
                    )),
                }
            }
        }
    }
}
