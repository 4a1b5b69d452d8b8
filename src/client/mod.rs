//! Remote item clients
//!
//! This module contains thin adapters that perform exactly one logical remote
//! call per invocation:
//! - `ItemSource::fetch` - fetch one item by id (Hacker News)
//! - `PageSource::query` - execute one page of a cursor-paginated query (GitHub GraphQL)
//!
//! Clients never retry. Every failure is classified as transient or permanent
//! and returned to the caller; retry and rate-limit policy live in
//! [`crate::crawler::Backoff`].

pub mod github;
mod hn;
mod http;
mod types;

pub use github::{GitHubClient, RepoRef};
pub use hn::HackerNewsClient;
pub use http::{build_http_client, user_agent_string};
pub use types::{
    Edge, EdgeShape, Item, ItemId, ItemKind, Page, QueryDescriptor, RateSnapshot, Response,
};

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single remote call
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure, timeout or 5xx; worth retrying
    #[error("Transient failure for {context}: {reason}")]
    Transient { context: String, reason: String },

    /// The remote quota is exhausted; worth retrying after a pause
    #[error("Rate limited on {context}")]
    RateLimited {
        context: String,
        retry_after: Option<Duration>,
    },

    /// 4xx other than 429, malformed payloads, query errors
    #[error("Permanent failure for {context}: {reason}")]
    Permanent { context: String, reason: String },

    /// The item does not exist
    #[error("Item {id} not found")]
    NotFound { id: ItemId },

    /// Retries were exhausted; carries the last transient cause
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    /// Returns true if the call may succeed when retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::RateLimited { .. })
    }

    /// Returns true if the remote reported the target as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// An ID-addressed item store
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Fetches one item; `FetchError::NotFound` when the id has no record
    async fn fetch(&self, id: ItemId) -> Result<Response<Item>, FetchError>;
}

/// A cursor-paginated query endpoint
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Executes a query and returns its raw `data` object
    async fn execute(
        &self,
        query: &QueryDescriptor,
        cursor: Option<&str>,
    ) -> Result<Response<Value>, FetchError>;

    /// Executes one page of a paginated query
    async fn query(
        &self,
        query: &QueryDescriptor,
        cursor: Option<&str>,
    ) -> Result<Response<Page>, FetchError> {
        let response = self.execute(query, cursor).await?;
        let page = Page::extract(&response.body, query)?;
        Ok(Response {
            body: page,
            rate: response.rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transient = FetchError::Transient {
            context: "item 1".to_string(),
            reason: "timeout".to_string(),
        };
        let limited = FetchError::RateLimited {
            context: "item 1".to_string(),
            retry_after: None,
        };
        let missing = FetchError::NotFound { id: 1 };

        assert!(transient.is_transient());
        assert!(limited.is_transient());
        assert!(!missing.is_transient());
        assert!(missing.is_not_found());
    }

    #[test]
    fn test_exhausted_is_permanent() {
        let err = FetchError::Exhausted {
            attempts: 3,
            last: Box::new(FetchError::Transient {
                context: "item 1".to_string(),
                reason: "HTTP 503".to_string(),
            }),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("HTTP 503"));
    }
}
