//! Wire and domain types shared by the remote clients
//!
//! `Item` is the decoded Hacker News record, `Page`/`Edge` are the decoded
//! shape of one GraphQL connection page, and `Response` carries rate-limit
//! metadata alongside every successful body.

use crate::client::FetchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of an item in the ID-addressed store
pub type ItemId = u64;

/// Discriminator for a fetched item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Story,
    Comment,
    Job,
    Poll,
    PollOpt,
    /// The item exists but was deleted or killed by moderation
    Deleted,
}

impl ItemKind {
    fn from_wire(kind: Option<&str>, deleted: bool) -> Option<Self> {
        if deleted {
            return Some(Self::Deleted);
        }
        match kind? {
            "story" => Some(Self::Story),
            "comment" => Some(Self::Comment),
            "job" => Some(Self::Job),
            "poll" => Some(Self::Poll),
            "pollopt" => Some(Self::PollOpt),
            _ => None,
        }
    }
}

/// An immutable record fetched from the item store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,

    #[serde(rename = "type")]
    pub kind: ItemKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<String>,

    /// Creation time in Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Child ids in the order the source ranks them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kids: Vec<ItemId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ItemId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descendants: Option<u64>,
}

impl Item {
    /// Returns true if the item was deleted or killed
    pub fn is_deleted(&self) -> bool {
        self.kind == ItemKind::Deleted
    }

    /// Returns the title when it is present and non-blank
    pub fn title(&self) -> Option<&str> {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Score, treating an absent score as zero
    pub fn score_or_zero(&self) -> i64 {
        self.score.unwrap_or(0)
    }
}

/// Raw item payload as served by `/v0/item/{id}.json`
#[derive(Debug, Deserialize)]
pub(crate) struct RawItem {
    id: ItemId,
    #[serde(rename = "type")]
    kind: Option<String>,
    by: Option<String>,
    time: Option<i64>,
    score: Option<i64>,
    title: Option<String>,
    text: Option<String>,
    url: Option<String>,
    #[serde(default)]
    kids: Vec<ItemId>,
    parent: Option<ItemId>,
    descendants: Option<u64>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    dead: bool,
}

impl RawItem {
    /// Converts the wire payload, rejecting records without a usable type
    pub(crate) fn into_item(self) -> Result<Item, FetchError> {
        let kind = ItemKind::from_wire(self.kind.as_deref(), self.deleted || self.dead)
            .ok_or_else(|| FetchError::Permanent {
                context: format!("item {}", self.id),
                reason: format!("unrecognized item type {:?}", self.kind),
            })?;

        Ok(Item {
            id: self.id,
            kind,
            by: self.by,
            time: self.time,
            score: self.score,
            title: self.title,
            text: self.text,
            url: self.url,
            kids: self.kids,
            parent: self.parent,
            descendants: self.descendants,
        })
    }
}

/// Rate-limit metadata reported by the remote API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSnapshot {
    /// Calls left in the current window
    pub remaining: u64,

    /// When the window resets
    pub reset_at: Option<DateTime<Utc>>,
}

/// A successful remote response plus any rate metadata it carried
#[derive(Debug, Clone)]
pub struct Response<T> {
    pub body: T,
    pub rate: Option<RateSnapshot>,
}

impl<T> Response<T> {
    /// Wraps a body that carried no rate metadata
    pub fn bare(body: T) -> Self {
        Self { body, rate: None }
    }
}

/// Where a connection keeps its timestamp-bearing entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeShape {
    /// `edges: [{ <timestamp>, node }]`
    Edges { timestamp: String },

    /// `nodes: [{ <timestamp>?, ... }]`; the node itself is the payload
    Nodes { timestamp: Option<String> },
}

/// Everything needed to issue one paginated query
#[derive(Debug, Clone)]
pub struct QueryDescriptor {
    /// Short label used in logs and error contexts
    pub label: String,

    /// GraphQL document; it must accept a `$cursor` variable when paginated
    pub document: String,

    /// Variables other than the cursor
    pub variables: serde_json::Map<String, Value>,

    /// Path from `data` to the connection object
    pub connection: Vec<String>,

    pub shape: EdgeShape,
}

impl QueryDescriptor {
    /// Builds the request variables for the given cursor
    pub fn variables_with_cursor(&self, cursor: Option<&str>) -> Value {
        let mut vars = self.variables.clone();
        vars.insert(
            "cursor".to_string(),
            cursor.map_or(Value::Null, |c| Value::String(c.to_string())),
        );
        Value::Object(vars)
    }
}

/// One entry of a connection page
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// The sortable timestamp, when the shape declares one
    pub timestamp: Option<DateTime<Utc>>,
    pub node: Value,
}

/// One page of a cursor-paginated connection
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub edges: Vec<Edge>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub total_count: Option<u64>,
}

impl Page {
    /// Extracts the connection page described by `query` from a `data` object
    pub fn extract(data: &Value, query: &QueryDescriptor) -> Result<Self, FetchError> {
        let malformed = |reason: String| FetchError::Permanent {
            context: query.label.clone(),
            reason,
        };

        let mut conn = data;
        for segment in &query.connection {
            conn = conn.get(segment).filter(|v| !v.is_null()).ok_or_else(|| {
                malformed(format!("missing '{}' in response", segment))
            })?;
        }

        let page_info = conn.get("pageInfo");
        let has_more = page_info
            .and_then(|p| p.get("hasNextPage"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let next_cursor = page_info
            .and_then(|p| p.get("endCursor"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let total_count = conn.get("totalCount").and_then(Value::as_u64);

        let (list_field, timestamp_field, split_node) = match &query.shape {
            EdgeShape::Edges { timestamp } => ("edges", Some(timestamp.as_str()), true),
            EdgeShape::Nodes { timestamp } => ("nodes", timestamp.as_deref(), false),
        };

        let entries = match conn.get(list_field) {
            Some(Value::Array(entries)) => entries.as_slice(),
            Some(Value::Null) | None => &[],
            Some(_) => return Err(malformed(format!("'{}' is not a list", list_field))),
        };

        let mut edges = Vec::with_capacity(entries.len());
        for entry in entries {
            let timestamp = match timestamp_field {
                Some(field) => {
                    let raw = entry.get(field).and_then(Value::as_str).ok_or_else(|| {
                        malformed(format!("entry without '{}' timestamp", field))
                    })?;
                    let parsed = DateTime::parse_from_rfc3339(raw)
                        .map_err(|e| malformed(format!("bad timestamp '{}': {}", raw, e)))?;
                    Some(parsed.with_timezone(&Utc))
                }
                None => None,
            };

            let node = if split_node {
                entry.get("node").cloned().unwrap_or(Value::Null)
            } else {
                entry.clone()
            };

            edges.push(Edge { timestamp, node });
        }

        if has_more && next_cursor.is_none() {
            return Err(malformed("hasNextPage is true but endCursor is null".to_string()));
        }

        Ok(Self {
            edges,
            next_cursor,
            has_more,
            total_count,
        })
    }
}
