//! Paginated cursor walker
//!
//! Streams the pages of one connection, folding each edge into an aggregate.
//! Connections are ordered by creation time, so the first edge past the
//! inclusion cutoff ends the walk and no further pages are requested.

use crate::client::{Edge, PageSource, QueryDescriptor};
use crate::crawler::backoff::Backoff;
use crate::crawler::FetchTask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Result of one metric computation
///
/// `Unknown` means the value could not be computed and is never equal to
/// `Known(0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "value")]
pub enum Metric {
    Known(u64),
    Unknown,
    /// The subject did not exist yet at the cutoff
    NotYetCreated,
}

impl Metric {
    pub fn value(&self) -> Option<u64> {
        match self {
            Self::Known(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// How page entries fold into a metric
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregation {
    /// Number of included entries
    Count,
    /// Number of distinct values; each entry contributes the first non-null
    /// JSON pointer in the list. Never stops early.
    Distinct { pointers: Vec<String> },
    /// The connection's `totalCount` on the first page
    TotalCount,
}

/// Decides whether an entry belongs to the metric
pub trait InclusionRule: Send + Sync {
    fn includes(&self, edge: &Edge) -> bool;
}

/// Entries created at or before the cutoff; entries without a timestamp count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedOnOrBefore(pub DateTime<Utc>);

impl InclusionRule for CreatedOnOrBefore {
    fn includes(&self, edge: &Edge) -> bool {
        edge.timestamp.map_or(true, |at| at <= self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IncludeAll;

impl InclusionRule for IncludeAll {
    fn includes(&self, _edge: &Edge) -> bool {
        true
    }
}

/// Why a walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStop {
    /// The last page was reached
    Exhausted,
    /// An entry failed the inclusion rule
    Excluded,
    /// A page could not be fetched
    Failed,
}

/// Metric plus how the walk got there
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOutcome {
    pub metric: Metric,
    pub pages: u32,
    pub stop: WalkStop,
}

/// Walks paginated connections through the backoff controller
pub struct CursorWalker<'a, P: ?Sized> {
    source: &'a P,
    backoff: &'a Backoff,
}

impl<'a, P: PageSource + ?Sized> CursorWalker<'a, P> {
    pub fn new(source: &'a P, backoff: &'a Backoff) -> Self {
        Self { source, backoff }
    }

    pub fn source(&self) -> &'a P {
        self.source
    }

    pub fn backoff(&self) -> &'a Backoff {
        self.backoff
    }

    /// Computes one metric over the connection described by `query`
    pub async fn walk(
        &self,
        query: &QueryDescriptor,
        rule: &dyn InclusionRule,
        aggregation: &Aggregation,
    ) -> Metric {
        self.walk_detailed(query, rule, aggregation).await.metric
    }

    /// Like [`CursorWalker::walk`], also reporting pages fetched and the stop reason
    pub async fn walk_detailed(
        &self,
        query: &QueryDescriptor,
        rule: &dyn InclusionRule,
        aggregation: &Aggregation,
    ) -> WalkOutcome {
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;
        let mut count = 0u64;
        let mut distinct: HashSet<String> = HashSet::new();

        loop {
            let mut task = FetchTask::page(
                &query.label,
                cursor.as_deref(),
                self.backoff.policy().max_attempts,
            );
            let source = self.source;
            let current = cursor.as_deref();

            let result = self
                .backoff
                .run(&mut task, || source.query(query, current))
                .await;
            let page = match result {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!("{}: metric unknown: {}", task, e);
                    return WalkOutcome {
                        metric: Metric::Unknown,
                        pages,
                        stop: WalkStop::Failed,
                    };
                }
            };
            pages += 1;

            match aggregation {
                Aggregation::TotalCount => {
                    let metric = match page.total_count {
                        Some(total) => Metric::Known(total),
                        None => {
                            tracing::warn!("{}: response has no totalCount", task);
                            Metric::Unknown
                        }
                    };
                    return WalkOutcome {
                        metric,
                        pages,
                        stop: WalkStop::Exhausted,
                    };
                }
                Aggregation::Count => {
                    for edge in &page.edges {
                        if !rule.includes(edge) {
                            return WalkOutcome {
                                metric: Metric::Known(count),
                                pages,
                                stop: WalkStop::Excluded,
                            };
                        }
                        count += 1;
                    }
                }
                Aggregation::Distinct { pointers } => {
                    for edge in page.edges.iter().filter(|e| rule.includes(e)) {
                        if let Some(value) = first_value(&edge.node, pointers) {
                            distinct.insert(value);
                        }
                    }
                }
            }

            if !page.has_more {
                break;
            }
            cursor = page.next_cursor;
        }

        let metric = match aggregation {
            Aggregation::Distinct { .. } => Metric::Known(distinct.len() as u64),
            _ => Metric::Known(count),
        };

        WalkOutcome {
            metric,
            pages,
            stop: WalkStop::Exhausted,
        }
    }
}

fn first_value(node: &serde_json::Value, pointers: &[String]) -> Option<String> {
    pointers.iter().find_map(|pointer| match node.pointer(pointer)? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    })
}
