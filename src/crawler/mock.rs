//! In-process sources for crawler unit tests

use crate::client::{
    Edge, FetchError, Item, ItemId, ItemKind, ItemSource, Page, PageSource, QueryDescriptor,
    Response,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) fn story(id: ItemId, title: &str, score: i64, kids: Vec<ItemId>) -> Item {
    Item {
        id,
        kind: ItemKind::Story,
        by: Some("author".to_string()),
        time: Some(1_600_000_000 + id as i64),
        score: Some(score),
        title: Some(title.to_string()),
        text: None,
        url: None,
        kids,
        parent: None,
        descendants: None,
    }
}

pub(crate) fn comment(id: ItemId, parent: ItemId, kids: Vec<ItemId>) -> Item {
    Item {
        id,
        kind: ItemKind::Comment,
        by: Some("commenter".to_string()),
        time: Some(1_600_000_000 + id as i64),
        score: None,
        title: None,
        text: Some(format!("comment {}", id)),
        url: None,
        kids,
        parent: Some(parent),
        descendants: None,
    }
}

/// Item store backed by a map
#[derive(Default)]
pub(crate) struct MockItemSource {
    items: Mutex<HashMap<ItemId, Item>>,
    permanent: Mutex<HashSet<ItemId>>,
    transient: Mutex<HashMap<ItemId, u32>>,
    fetched: Mutex<Vec<ItemId>>,
    stall_after: Mutex<Option<usize>>,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockItemSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, item: Item) {
        self.items.lock().unwrap().insert(item.id, item);
    }

    pub(crate) fn insert_deleted(&self, id: ItemId) {
        let mut item = story(id, "", 0, vec![]);
        item.kind = ItemKind::Deleted;
        item.title = None;
        self.insert(item);
    }

    pub(crate) fn fail_permanently(&self, id: ItemId) {
        self.permanent.lock().unwrap().insert(id);
    }

    /// The next `times` fetches of `id` fail transiently
    pub(crate) fn fail_transiently(&self, id: ItemId, times: u32) {
        self.transient.lock().unwrap().insert(id, times);
    }

    /// Fetches after the first `calls` never complete
    pub(crate) fn stall_after(&self, calls: usize) {
        *self.stall_after.lock().unwrap() = Some(calls);
    }

    pub(crate) fn clear_stall(&self) {
        *self.stall_after.lock().unwrap() = None;
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Ids in the order they were requested
    pub(crate) fn fetched(&self) -> Vec<ItemId> {
        self.fetched.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItemSource for MockItemSource {
    async fn fetch(&self, id: ItemId) -> Result<Response<Item>, FetchError> {
        let calls = {
            let mut fetched = self.fetched.lock().unwrap();
            fetched.push(id);
            fetched.len()
        };

        let stall = *self.stall_after.lock().unwrap();
        if matches!(stall, Some(limit) if calls > limit) {
            std::future::pending::<()>().await;
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.permanent.lock().unwrap().contains(&id) {
            return Err(FetchError::Permanent {
                context: format!("item {}", id),
                reason: "HTTP 400".to_string(),
            });
        }

        {
            let mut transient = self.transient.lock().unwrap();
            if let Some(left) = transient.get_mut(&id) {
                if *left > 0 {
                    *left -= 1;
                    return Err(FetchError::Transient {
                        context: format!("item {}", id),
                        reason: "HTTP 503".to_string(),
                    });
                }
            }
        }

        match self.items.lock().unwrap().get(&id) {
            Some(item) => Ok(Response::bare(item.clone())),
            None => Err(FetchError::NotFound { id }),
        }
    }
}

pub(crate) fn edge(timestamp: &str, node: Value) -> Edge {
    Edge {
        timestamp: Some(
            DateTime::parse_from_rfc3339(timestamp)
                .unwrap()
                .with_timezone(&Utc),
        ),
        node,
    }
}

pub(crate) fn page(edges: Vec<Edge>, next_cursor: Option<&str>, total_count: Option<u64>) -> Page {
    Page {
        edges,
        has_more: next_cursor.is_some(),
        next_cursor: next_cursor.map(str::to_string),
        total_count,
    }
}

type PageKey = (String, Option<String>);

/// Paginated source keyed by query label and cursor
#[derive(Default)]
pub(crate) struct MockPageSource {
    pages: Mutex<HashMap<PageKey, Page>>,
    failing: Mutex<HashSet<PageKey>>,
    documents: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<PageKey>>,
}

impl MockPageSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_page(&self, label: &str, cursor: Option<&str>, page: Page) {
        self.pages
            .lock()
            .unwrap()
            .insert((label.to_string(), cursor.map(str::to_string)), page);
    }

    pub(crate) fn fail_page(&self, label: &str, cursor: Option<&str>) {
        self.failing
            .lock()
            .unwrap()
            .insert((label.to_string(), cursor.map(str::to_string)));
    }

    /// Raw `data` returned by `execute` for `label`
    pub(crate) fn add_document(&self, label: &str, data: Value) {
        self.documents.lock().unwrap().insert(label.to_string(), data);
    }

    /// Number of requests made for `label`
    pub(crate) fn calls_for(&self, label: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| l == label)
            .count()
    }

    fn record(&self, key: &PageKey) -> Result<(), FetchError> {
        self.calls.lock().unwrap().push(key.clone());
        if self.failing.lock().unwrap().contains(key) {
            return Err(FetchError::Permanent {
                context: key.0.clone(),
                reason: "GraphQL errors: something went wrong".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PageSource for MockPageSource {
    async fn execute(
        &self,
        query: &QueryDescriptor,
        cursor: Option<&str>,
    ) -> Result<Response<Value>, FetchError> {
        let key = (query.label.clone(), cursor.map(str::to_string));
        self.record(&key)?;
        self.documents
            .lock()
            .unwrap()
            .get(&query.label)
            .cloned()
            .map(Response::bare)
            .ok_or_else(|| FetchError::Permanent {
                context: query.label.clone(),
                reason: "no document".to_string(),
            })
    }

    async fn query(
        &self,
        query: &QueryDescriptor,
        cursor: Option<&str>,
    ) -> Result<Response<Page>, FetchError> {
        let key = (query.label.clone(), cursor.map(str::to_string));
        self.record(&key)?;
        self.pages
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .map(Response::bare)
            .ok_or_else(|| FetchError::Permanent {
                context: query.label.clone(),
                reason: format!("no page for cursor {:?}", cursor),
            })
    }
}
