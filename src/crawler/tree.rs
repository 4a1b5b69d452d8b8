//! Recursive reply-tree fetcher
//!
//! Trees are expanded breadth-first, one wave per depth level. Each wave
//! fetches up to `max_children` kids of every parent in the previous wave,
//! with at most `concurrency` requests in flight. Results land in slots
//! assigned before the wave starts, so children keep the source order no
//! matter which request finishes first.

use crate::checkpoint::{Checkpoint, CheckpointStore, CheckpointStoreExt, Keyed};
use crate::client::{Item, ItemId, ItemSource};
use crate::crawler::backoff::Backoff;
use crate::crawler::FetchTask;
use crate::progress::CrawlProgress;
use crate::HarvestError;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

/// Bounds on one expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeLimits {
    /// Reply levels below the root; 0 returns the root alone
    pub max_depth: u32,
    /// Kids fetched per parent, in source order
    pub max_children: usize,
}

/// A node of an expanded reply tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: ItemId,
    pub depth: u32,

    /// `None` when the item could not be fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

/// A subject item with its replies
pub type CommentTree = TreeNode;

impl TreeNode {
    /// Number of nodes below this one whose item was fetched
    pub fn reply_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| usize::from(c.item.is_some()) + c.reply_count())
            .sum()
    }

    /// Depth of the deepest node in the tree
    pub fn max_depth(&self) -> u32 {
        self.children
            .iter()
            .map(TreeNode::max_depth)
            .max()
            .unwrap_or(self.depth)
    }
}

struct Slot {
    id: ItemId,
    depth: u32,
    item: Option<Item>,
    children: Vec<usize>,
}

/// Expands subject items into reply trees
pub struct TreeFetcher<'a, S: ?Sized> {
    source: &'a S,
    backoff: &'a Backoff,
    concurrency: usize,
}

impl<'a, S: ItemSource + ?Sized> TreeFetcher<'a, S> {
    pub fn new(source: &'a S, backoff: &'a Backoff, concurrency: usize) -> Self {
        Self {
            source,
            backoff,
            concurrency: concurrency.max(1),
        }
    }

    /// Expands `root` to at most `limits.max_depth` levels
    ///
    /// Kids that are missing or fail permanently become leaves with no item;
    /// their own kids are never requested.
    pub async fn expand(&self, root: Item, limits: TreeLimits) -> CommentTree {
        let mut arena = vec![Slot {
            id: root.id,
            depth: 0,
            item: Some(root),
            children: Vec::new(),
        }];
        let mut frontier = if limits.max_depth > 0 {
            vec![0usize]
        } else {
            Vec::new()
        };
        let mut depth = 0;

        while !frontier.is_empty() {
            depth += 1;
            let mut tasks: Vec<(usize, FetchTask)> = Vec::new();

            for &parent in &frontier {
                let kids: Vec<ItemId> = arena[parent]
                    .item
                    .as_ref()
                    .map(|item| item.kids.iter().take(limits.max_children).copied().collect())
                    .unwrap_or_default();

                for kid in kids {
                    let slot = arena.len();
                    arena.push(Slot {
                        id: kid,
                        depth,
                        item: None,
                        children: Vec::new(),
                    });
                    arena[parent].children.push(slot);
                    tasks.push((
                        slot,
                        FetchTask::item(
                            kid,
                            limits.max_depth - depth,
                            self.backoff.policy().max_attempts,
                        ),
                    ));
                }
            }

            if tasks.is_empty() {
                break;
            }

            tracing::debug!("Wave {}: fetching {} items", depth, tasks.len());

            let source = self.source;
            let backoff = self.backoff;
            let results: Vec<(usize, Option<Item>, u32)> = stream::iter(tasks)
                .map(|(slot, mut task)| async move {
                    let id = task.item_id().unwrap_or_default();
                    let result = backoff.run(&mut task, || source.fetch(id)).await;
                    let item = match result {
                        Ok(item) => Some(item),
                        Err(e) => {
                            if e.is_not_found() {
                                tracing::debug!("{} is missing", task);
                            } else {
                                tracing::warn!("Dropping {}: {}", task, e);
                            }
                            None
                        }
                    };
                    (slot, item, task.depth_remaining)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            let mut next = Vec::new();
            for (slot, item, depth_remaining) in results {
                if item.is_some() && depth_remaining > 0 {
                    next.push(slot);
                }
                arena[slot].item = item;
            }
            // Slots were assigned in source order
            next.sort_unstable();
            frontier = next;
        }

        assemble(&mut arena, 0)
    }
}

fn assemble(arena: &mut [Slot], index: usize) -> TreeNode {
    let item = arena[index].item.take();
    let children = std::mem::take(&mut arena[index].children);
    TreeNode {
        id: arena[index].id,
        depth: arena[index].depth,
        item,
        children: children.into_iter().map(|c| assemble(arena, c)).collect(),
    }
}

/// A subject together with its expanded replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedSubject {
    pub subject_id: ItemId,
    pub replies: usize,
    pub tree: CommentTree,
}

impl Keyed for ExpandedSubject {
    fn key(&self) -> String {
        self.subject_id.to_string()
    }
}

/// Counters for one expansion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpandReport {
    pub expanded: usize,
    pub skipped: usize,
    pub replies: usize,
}

/// Expands every subject in order, saving after each new result
///
/// Subjects are matched against the checkpoint by id, not by position, so a
/// subject list that grows or is reordered between runs never skips a
/// subject that was not expanded. The cursor records the furthest list
/// position reached.
pub async fn run_expand<S: ItemSource + ?Sized>(
    store: &mut dyn CheckpointStore,
    key: &str,
    checkpoint: &mut Checkpoint<ExpandedSubject>,
    fetcher: &TreeFetcher<'_, S>,
    subjects: &[Item],
    limits: TreeLimits,
    progress: &CrawlProgress,
) -> Result<ExpandReport, HarvestError> {
    let mut report = ExpandReport::default();
    let mut unsaved = false;

    tracing::info!(
        "Expanding {} subjects (depth {}, {} children per parent), {} already present",
        subjects.len(),
        limits.max_depth,
        limits.max_children,
        checkpoint.len()
    );
    progress.set_results(checkpoint.len());

    for (index, subject) in subjects.iter().enumerate() {
        let position = index as u64 + 1;
        let next_cursor = checkpoint.cursor().max(position);

        if checkpoint.contains(&subject.key()) {
            report.skipped += 1;
            unsaved |= next_cursor > checkpoint.cursor();
            checkpoint.advance_to(next_cursor)?;
        } else {
            let tree = fetcher.expand(subject.clone(), limits).await;
            let replies = tree.reply_count();
            report.expanded += 1;
            report.replies += replies;
            tracing::debug!("Expanded {} with {} replies", subject.id, replies);

            checkpoint.record_and_advance(
                Some(ExpandedSubject {
                    subject_id: subject.id,
                    replies,
                    tree,
                }),
                next_cursor,
            )?;
            store.save(key, checkpoint).map_err(HarvestError::from_store)?;
            unsaved = false;
        }

        progress.set_position(position);
        progress.set_results(checkpoint.len());

        if position % 10 == 0 {
            tracing::info!(
                "Progress: {}/{} subjects expanded, {} replies",
                position,
                subjects.len(),
                report.replies
            );
        }
    }

    if unsaved {
        store.save(key, checkpoint).map_err(HarvestError::from_store)?;
    }

    tracing::info!(
        "Expansion '{}' complete: {} expanded, {} already present, {} replies",
        key,
        report.expanded,
        report.skipped,
        report.replies
    );

    Ok(report)
}
