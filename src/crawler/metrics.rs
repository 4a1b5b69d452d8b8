//! Historical repository metrics
//!
//! For every `(repository, month)` unit the harvester computes each
//! configured metric as of the last second of that month. Units for months
//! before the repository existed are marked `NotYetCreated` without walking
//! any connection.

use crate::checkpoint::{Checkpoint, CheckpointStore, CheckpointStoreExt, Keyed};
use crate::client::github::{self, RepoRef};
use crate::client::PageSource;
use crate::crawler::walker::{
    Aggregation, CreatedOnOrBefore, CursorWalker, IncludeAll, InclusionRule, Metric,
};
use crate::progress::CrawlProgress;
use crate::HarvestError;
use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A metric the walk job can compute
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum MetricKind {
    Stars,
    Forks,
    PullRequests,
    Commits,
    Contributors,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Stars,
        MetricKind::Forks,
        MetricKind::PullRequests,
        MetricKind::Commits,
        MetricKind::Contributors,
    ];

    /// Name as written in configuration
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stars => "stars",
            Self::Forks => "forks",
            Self::PullRequests => "pull-requests",
            Self::Commits => "commits",
            Self::Contributors => "contributors",
        }
    }

    fn query(&self, repo: &RepoRef, cutoff: DateTime<Utc>, page_size: u32) -> crate::client::QueryDescriptor {
        match self {
            Self::Stars => github::stargazers(repo, page_size),
            Self::Forks => github::forks(repo, page_size),
            Self::PullRequests => github::pull_requests(repo, page_size),
            Self::Commits => github::commit_total(repo, cutoff),
            Self::Contributors => github::commit_authors(repo, cutoff, page_size),
        }
    }

    fn aggregation(&self) -> Aggregation {
        match self {
            Self::Stars | Self::Forks | Self::PullRequests => Aggregation::Count,
            Self::Commits => Aggregation::TotalCount,
            Self::Contributors => Aggregation::Distinct {
                pointers: vec!["/author/user/login".to_string(), "/author/email".to_string()],
            },
        }
    }

    fn rule(&self, cutoff: DateTime<Utc>) -> Box<dyn InclusionRule> {
        match self {
            Self::Stars | Self::Forks | Self::PullRequests => Box::new(CreatedOnOrBefore(cutoff)),
            // The query itself is bounded by `until`
            Self::Commits | Self::Contributors => Box::new(IncludeAll),
        }
    }
}

/// One `(repository, month)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricUnit {
    pub repo: RepoRef,

    /// First day of the month
    pub month: NaiveDate,

    /// Last second of the month
    pub cutoff: DateTime<Utc>,
}

impl MetricUnit {
    pub fn new(repo: RepoRef, month: NaiveDate) -> Option<Self> {
        let month = month.with_day(1)?;
        let next = month.checked_add_months(Months::new(1))?;
        let last_day = next.pred_opt()?;
        let cutoff = Utc.from_utc_datetime(&last_day.and_hms_opt(23, 59, 59)?);
        Some(Self { repo, month, cutoff })
    }

    /// `owner/name@YYYY-MM`
    pub fn key(&self) -> String {
        format!("{}@{}", self.repo, self.month.format("%Y-%m"))
    }
}

/// Every unit for `repos` between the `from` and `until` months inclusive
///
/// Units are ordered by repository, then month; the walk cursor indexes
/// this list.
pub fn plan_units(repos: &[RepoRef], from: NaiveDate, until: NaiveDate) -> Vec<MetricUnit> {
    let mut units = Vec::new();
    for repo in repos {
        let mut month = from.with_day(1);
        while let Some(current) = month {
            if current > until {
                break;
            }
            match MetricUnit::new(repo.clone(), current) {
                Some(unit) => units.push(unit),
                None => break,
            }
            month = current.checked_add_months(Months::new(1));
        }
    }
    units
}

/// Metrics of one repository as of one month end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub repository: String,
    pub month: String,
    pub cutoff: DateTime<Utc>,
    pub metrics: BTreeMap<MetricKind, Metric>,
}

impl Keyed for MetricRow {
    fn key(&self) -> String {
        format!("{}@{}", self.repository, self.month)
    }
}

impl MetricRow {
    fn filled(unit: &MetricUnit, kinds: &[MetricKind], metric: Metric) -> Self {
        Self {
            repository: unit.repo.to_string(),
            month: unit.month.format("%Y-%m").to_string(),
            cutoff: unit.cutoff,
            metrics: kinds.iter().map(|k| (*k, metric)).collect(),
        }
    }

    pub fn unknown_count(&self) -> usize {
        self.metrics.values().filter(|m| m.is_unknown()).count()
    }
}

/// Computes metric rows, caching each repository's creation time
pub struct MetricsHarvester<'a, P: ?Sized> {
    walker: CursorWalker<'a, P>,
    kinds: Vec<MetricKind>,
    page_size: u32,
    created: HashMap<RepoRef, DateTime<Utc>>,
}

impl<'a, P: PageSource + ?Sized> MetricsHarvester<'a, P> {
    pub fn new(walker: CursorWalker<'a, P>, kinds: Vec<MetricKind>, page_size: u32) -> Self {
        Self {
            walker,
            kinds,
            page_size,
            created: HashMap::new(),
        }
    }

    async fn created_at(&mut self, repo: &RepoRef) -> Option<DateTime<Utc>> {
        if let Some(at) = self.created.get(repo) {
            return Some(*at);
        }

        let query = github::repository_info(repo);
        let source = self.walker.source();
        let data = match self
            .walker
            .backoff()
            .call(&query.label, || source.execute(&query, None))
            .await
        {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("{}: creation date unavailable: {}", repo, e);
                return None;
            }
        };

        let created = data
            .pointer("/repository/createdAt")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        match created {
            Some(at) => {
                self.created.insert(repo.clone(), at);
                Some(at)
            }
            None => {
                tracing::warn!("{}: response has no createdAt", repo);
                None
            }
        }
    }

    /// Computes every configured metric for `unit`
    pub async fn harvest(&mut self, unit: &MetricUnit) -> MetricRow {
        let Some(created) = self.created_at(&unit.repo).await else {
            return MetricRow::filled(unit, &self.kinds, Metric::Unknown);
        };

        if created > unit.cutoff {
            tracing::debug!("{}: repository created after cutoff", unit.key());
            return MetricRow::filled(unit, &self.kinds, Metric::NotYetCreated);
        }

        let mut metrics = BTreeMap::new();
        for kind in &self.kinds {
            let query = kind.query(&unit.repo, unit.cutoff, self.page_size);
            let rule = kind.rule(unit.cutoff);
            let metric = self
                .walker
                .walk(&query, rule.as_ref(), &kind.aggregation())
                .await;
            tracing::debug!("{} {:?}: {:?}", unit.key(), kind, metric);
            metrics.insert(*kind, metric);
        }

        MetricRow {
            repository: unit.repo.to_string(),
            month: unit.month.format("%Y-%m").to_string(),
            cutoff: unit.cutoff,
            metrics,
        }
    }
}

/// Counters for one walk run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkReport {
    pub harvested: usize,
    pub skipped: usize,
    pub unknown: usize,
}

/// Harvests every unit in order, saving after each new row
///
/// Units already present in the checkpoint (by `owner/name@YYYY-MM` key) are
/// skipped wherever they appear, so extending the month range or adding a
/// repository between runs harvests every new unit.
pub async fn run_walk<P: PageSource + ?Sized>(
    store: &mut dyn CheckpointStore,
    key: &str,
    checkpoint: &mut Checkpoint<MetricRow>,
    harvester: &mut MetricsHarvester<'_, P>,
    units: &[MetricUnit],
    progress: &CrawlProgress,
) -> Result<WalkReport, HarvestError> {
    let mut report = WalkReport::default();
    let mut unsaved = false;

    tracing::info!(
        "Walking {} repository-months, {} already present",
        units.len(),
        checkpoint.len()
    );
    progress.set_results(checkpoint.len());

    for (index, unit) in units.iter().enumerate() {
        let position = index as u64 + 1;
        let next_cursor = checkpoint.cursor().max(position);

        if checkpoint.contains(&unit.key()) {
            report.skipped += 1;
            unsaved |= next_cursor > checkpoint.cursor();
            checkpoint.advance_to(next_cursor)?;
        } else {
            let row = harvester.harvest(unit).await;
            report.harvested += 1;
            report.unknown += row.unknown_count();
            checkpoint.record_and_advance(Some(row), next_cursor)?;
            store.save(key, checkpoint).map_err(HarvestError::from_store)?;
            unsaved = false;
        }

        progress.set_position(position);
        progress.set_results(checkpoint.len());

        if position % 10 == 0 {
            tracing::info!("Progress: {}/{} repository-months", position, units.len());
        }
    }

    if unsaved {
        store.save(key, checkpoint).map_err(HarvestError::from_store)?;
    }

    tracing::info!(
        "Walk '{}' complete: {} harvested, {} already present, {} unknown metrics",
        key,
        report.harvested,
        report.skipped,
        report.unknown
    );

    Ok(report)
}
