//! ID-range scanner
//!
//! Walks `start, start + stride, ...` below `end`, fetching each id and
//! classifying it. The scanner is pull-based: nothing is fetched until the
//! caller asks for the next step, and the cursor it reports is the next id
//! to examine.

use crate::checkpoint::{Checkpoint, CheckpointStore, CheckpointStoreExt};
use crate::client::{FetchError, Item, ItemId, ItemSource};
use crate::crawler::backoff::Backoff;
use crate::crawler::predicate::ScanFilter;
use crate::progress::CrawlProgress;
use crate::HarvestError;

/// The id lattice a scan covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    /// First id (inclusive)
    pub start: u64,
    /// Upper bound (exclusive)
    pub end: u64,
    pub stride: u64,
}

impl ScanRange {
    pub fn new(start: u64, end: u64, stride: u64) -> Self {
        Self {
            start,
            end,
            stride: stride.max(1),
        }
    }

    /// First lattice id at or after `cursor`
    pub fn align(&self, cursor: u64) -> u64 {
        if cursor <= self.start {
            return self.start;
        }
        let offset = cursor - self.start;
        let steps = offset.div_ceil(self.stride);
        self.start.saturating_add(steps.saturating_mul(self.stride))
    }

    /// Number of ids the full range examines
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start).div_ceil(self.stride)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why an item was skipped without being classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReason {
    /// The store has no record for the id
    NotFound,
    /// The record is deleted or dead
    Deleted,
    /// The record has no usable title
    Untitled,
}

/// Classification of one examined id
#[derive(Debug)]
pub enum ScanOutcome {
    /// Included in the result set
    Matched(Item),
    /// Score below the threshold
    BelowThreshold { score: i64 },
    /// The predicate did not match
    Rejected,
    Missing(MissingReason),
    /// Permanent failure or exhausted retries; the id is skipped
    Failed(FetchError),
}

/// One step of the scan: the id examined and the cursor after it
#[derive(Debug)]
pub struct ScanStep {
    pub id: ItemId,
    pub next_cursor: u64,
    pub outcome: ScanOutcome,
}

impl ScanStep {
    /// The matched item, if any
    pub fn into_result(self) -> Option<Item> {
        match self.outcome {
            ScanOutcome::Matched(item) => Some(item),
            _ => None,
        }
    }
}

/// Lazy scan over an id range
pub struct IdScanner<'a, S: ?Sized> {
    source: &'a S,
    backoff: &'a Backoff,
    range: ScanRange,
    filter: ScanFilter,
    next_id: u64,
}

impl<'a, S: ItemSource + ?Sized> IdScanner<'a, S> {
    /// Creates a scanner that resumes at `resume_cursor`
    ///
    /// Scanning starts at `max(start, resume_cursor)` rounded up onto the
    /// stride lattice, so ids below a saved cursor are never refetched.
    pub fn new(
        source: &'a S,
        backoff: &'a Backoff,
        range: ScanRange,
        filter: ScanFilter,
        resume_cursor: u64,
    ) -> Self {
        Self {
            source,
            backoff,
            range,
            filter,
            next_id: range.align(resume_cursor),
        }
    }

    pub fn range(&self) -> ScanRange {
        self.range
    }

    /// The next id to examine
    pub fn cursor(&self) -> u64 {
        self.next_id
    }

    /// Moves the scanner forward to `cursor`; never moves it back
    pub fn resume_from(&mut self, cursor: u64) {
        self.next_id = self.next_id.max(self.range.align(cursor));
    }

    /// Fetches and classifies the next id, or `None` when the range is done
    pub async fn next_step(&mut self) -> Option<ScanStep> {
        if self.next_id >= self.range.end {
            return None;
        }

        let id = self.next_id;
        let next_cursor = id.saturating_add(self.range.stride);
        self.next_id = next_cursor;

        let label = format!("item {}", id);
        let source = self.source;
        let outcome = match self
            .backoff
            .call(&label, || source.fetch(id))
            .await
        {
            Ok(item) => self.classify(item),
            Err(e) if e.is_not_found() => ScanOutcome::Missing(MissingReason::NotFound),
            Err(e) => ScanOutcome::Failed(e),
        };

        Some(ScanStep {
            id,
            next_cursor,
            outcome,
        })
    }

    fn classify(&self, item: Item) -> ScanOutcome {
        if item.is_deleted() {
            return ScanOutcome::Missing(MissingReason::Deleted);
        }
        if item.title().is_none() {
            return ScanOutcome::Missing(MissingReason::Untitled);
        }

        let score = item.score_or_zero();
        if score < self.filter.min_score {
            return ScanOutcome::BelowThreshold { score };
        }

        if self.filter.predicate.matches(&item) {
            ScanOutcome::Matched(item)
        } else {
            ScanOutcome::Rejected
        }
    }
}

/// Counters for one scan run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub examined: u64,
    pub matched: u64,
    pub excluded: u64,
    pub failed: u64,
    pub cursor: u64,
}

/// Drives `scanner` to the end of its range, checkpointing as it goes
///
/// Every step is recorded with [`Checkpoint::record_and_advance`]; the
/// checkpoint is saved every `save_interval` steps and once at the end. If
/// the returned future is dropped mid-run, the last save is a consistent
/// resume point.
pub async fn run_scan<S: ItemSource + ?Sized>(
    store: &mut dyn CheckpointStore,
    key: &str,
    checkpoint: &mut Checkpoint<Item>,
    scanner: &mut IdScanner<'_, S>,
    save_interval: u64,
    progress: &CrawlProgress,
) -> Result<ScanReport, HarvestError> {
    scanner.resume_from(checkpoint.cursor());
    let range = scanner.range();
    let save_interval = save_interval.max(1);

    let mut report = ScanReport::default();
    let mut unsaved = 0u64;

    tracing::info!(
        "Scanning ids {}..{} (stride {}) from {}",
        range.start,
        range.end,
        range.stride,
        scanner.cursor()
    );
    progress.set_position(scanner.cursor().saturating_sub(range.start));
    progress.set_results(checkpoint.len());

    while let Some(step) = scanner.next_step().await {
        report.examined += 1;

        match &step.outcome {
            ScanOutcome::Matched(item) => {
                tracing::debug!("Matched {}: {}", step.id, item.title().unwrap_or_default());
            }
            ScanOutcome::Failed(e) => {
                report.failed += 1;
                tracing::warn!("Skipping {}: {}", step.id, e);
            }
            other => {
                report.excluded += 1;
                tracing::trace!("Excluded {}: {:?}", step.id, other);
            }
        }

        let next_cursor = step.next_cursor;
        if checkpoint.record_and_advance(step.into_result(), next_cursor)? {
            report.matched += 1;
        }

        unsaved += 1;
        if unsaved >= save_interval {
            store.save(key, checkpoint).map_err(HarvestError::from_store)?;
            unsaved = 0;
        }

        progress.set_position(next_cursor.min(range.end).saturating_sub(range.start));
        progress.set_results(checkpoint.len());

        if report.examined % 1000 == 0 {
            tracing::info!(
                "Progress: {} ids examined, {} matched, cursor {}",
                report.examined,
                checkpoint.len(),
                checkpoint.cursor()
            );
        }
    }

    store.save(key, checkpoint).map_err(HarvestError::from_store)?;
    report.cursor = checkpoint.cursor();

    tracing::info!(
        "Scan '{}' complete: {} examined, {} new matches, {} failed, {} total",
        key,
        report.examined,
        report.matched,
        report.failed,
        checkpoint.len()
    );

    Ok(report)
}
