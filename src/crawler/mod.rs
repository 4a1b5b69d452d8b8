//! Crawler module: the resumable fetch engine
//!
//! This module contains the core crawling logic, including:
//! - Retry and rate-limit control for every remote call
//! - The id-range scanner and its keyword filter
//! - Breadth-first reply-tree expansion
//! - Cursor-paginated metric walks
//! - Job coordination (checkpoint loading, progress, reports)

mod backoff;
mod coordinator;
mod metrics;
mod predicate;
mod scanner;
mod tree;
mod walker;

#[cfg(test)]
pub(crate) mod mock;

pub use backoff::{Backoff, RateState, RetryPolicy};
pub use coordinator::{Harvester, Job, JobReport, RunOptions};
pub use metrics::{plan_units, run_walk, MetricKind, MetricRow, MetricUnit, MetricsHarvester, WalkReport};
pub use predicate::{ItemPredicate, KeywordPredicate, ScanFilter};
pub use scanner::{
    run_scan, IdScanner, MissingReason, ScanOutcome, ScanRange, ScanReport, ScanStep,
};
pub use tree::{run_expand, CommentTree, ExpandReport, ExpandedSubject, TreeFetcher, TreeLimits, TreeNode};
pub use walker::{
    Aggregation, CreatedOnOrBefore, CursorWalker, IncludeAll, InclusionRule, Metric, WalkOutcome,
    WalkStop,
};

use crate::client::ItemId;
use std::fmt;

/// What a single unit of remote work targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    /// One item of the id-addressed store
    Item(ItemId),
    /// One page of a paginated query
    Page { label: String, cursor: Option<String> },
}

/// One remote call as scheduled by a driver
///
/// `retries_remaining` starts at the policy's attempt budget and is spent by
/// [`Backoff::run`]. `depth_remaining` is how many levels below this item a
/// tree expansion may still descend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub target: FetchTarget,
    pub depth_remaining: u32,
    pub retries_remaining: u32,
}

impl FetchTask {
    pub fn item(id: ItemId, depth_remaining: u32, retries: u32) -> Self {
        Self {
            target: FetchTarget::Item(id),
            depth_remaining,
            retries_remaining: retries,
        }
    }

    pub fn page(label: &str, cursor: Option<&str>, retries: u32) -> Self {
        Self {
            target: FetchTarget::Page {
                label: label.to_string(),
                cursor: cursor.map(str::to_string),
            },
            depth_remaining: 0,
            retries_remaining: retries,
        }
    }

    pub fn item_id(&self) -> Option<ItemId> {
        match self.target {
            FetchTarget::Item(id) => Some(id),
            FetchTarget::Page { .. } => None,
        }
    }
}

impl fmt::Display for FetchTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            FetchTarget::Item(id) => write!(f, "item {}", id),
            FetchTarget::Page {
                label,
                cursor: None,
            } => write!(f, "{} (first page)", label),
            FetchTarget::Page {
                label,
                cursor: Some(cursor),
            } => write!(f, "{} (after {})", label, cursor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_task_labels() {
        assert_eq!(FetchTask::item(42, 2, 5).to_string(), "item 42");
        assert_eq!(
            FetchTask::page("octo/hello stargazers", None, 5).to_string(),
            "octo/hello stargazers (first page)"
        );
        assert_eq!(
            FetchTask::page("octo/hello forks", Some("Y3Vy"), 5).to_string(),
            "octo/hello forks (after Y3Vy)"
        );
        assert_eq!(FetchTask::page("x", None, 1).item_id(), None);
    }
}
