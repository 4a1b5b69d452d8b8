//! HTTP plumbing shared by the remote clients
//!
//! This module handles:
//! - Building the HTTP client with a proper user agent and timeouts
//! - Classifying transport errors and status codes into `FetchError`
//! - Reading rate-limit headers into a `RateSnapshot`

use crate::client::{FetchError, RateSnapshot};
use crate::config::ClientConfig;
use chrono::{TimeZone, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Formats the user agent: `CrawlerName/Version (+ContactURL; ContactEmail)`
pub fn user_agent_string(config: &ClientConfig) -> String {
    format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    )
}

/// Builds an HTTP client with proper configuration
///
/// Every request carries the configured timeout; a timed out request is a
/// transient failure and goes through the retry policy like any other.
///
/// # Example
///
/// ```no_run
/// use tidepool::client::build_http_client;
/// use tidepool::config::ClientConfig;
///
/// let config = ClientConfig {
///     crawler_name: "Tidepool".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
///     ..ClientConfig::default()
/// };
///
/// let client = build_http_client(&config).unwrap();
/// ```
pub fn build_http_client(config: &ClientConfig) -> Result<Client, reqwest::Error> {
    let timeout = Duration::from_secs(config.timeout_secs);

    Client::builder()
        .user_agent(user_agent_string(config))
        .timeout(timeout)
        .connect_timeout(timeout)
        .gzip(true)
        .brotli(true)
        .build()
}

/// Classifies a transport-level error
///
/// | Condition | Class |
/// |-----------|-------|
/// | Timeout | Transient |
/// | Connection refused / reset | Transient |
/// | Body decode failure | Permanent |
/// | Anything else | Transient |
pub(crate) fn classify_transport(err: reqwest::Error, context: &str) -> FetchError {
    if err.is_decode() {
        return FetchError::Permanent {
            context: context.to_string(),
            reason: format!("malformed response body: {}", err),
        };
    }

    let reason = if err.is_timeout() {
        "request timeout".to_string()
    } else if err.is_connect() {
        "connection failed".to_string()
    } else {
        err.to_string()
    };

    FetchError::Transient {
        context: context.to_string(),
        reason,
    }
}

/// Classifies a non-success HTTP status
///
/// | Status | Class |
/// |--------|-------|
/// | 429 | RateLimited (honours `Retry-After`, else `X-RateLimit-Reset`) |
/// | 403 with `X-RateLimit-Remaining: 0` | RateLimited |
/// | 404 | NotFound when an item id is known, else Permanent |
/// | 408, 5xx | Transient |
/// | Other 4xx | Permanent |
pub(crate) fn classify_status(
    status: StatusCode,
    headers: &HeaderMap,
    context: &str,
    item_id: Option<u64>,
) -> FetchError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && parse_rate_headers(headers).map_or(false, |r| r.remaining == 0))
    {
        return FetchError::RateLimited {
            context: context.to_string(),
            retry_after: parse_retry_after(headers).or_else(|| reset_delay(headers)),
        };
    }

    if status == StatusCode::NOT_FOUND {
        if let Some(id) = item_id {
            return FetchError::NotFound { id };
        }
    }

    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return FetchError::Transient {
            context: context.to_string(),
            reason: format!("HTTP {}", status.as_u16()),
        };
    }

    FetchError::Permanent {
        context: context.to_string(),
        reason: format!("HTTP {}", status.as_u16()),
    }
}

/// Reads `X-RateLimit-Remaining` / `X-RateLimit-Reset` (Unix seconds)
pub(crate) fn parse_rate_headers(headers: &HeaderMap) -> Option<RateSnapshot> {
    let remaining = header_u64(headers, "x-ratelimit-remaining")?;
    let reset_at = header_u64(headers, "x-ratelimit-reset")
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

    Some(RateSnapshot {
        remaining,
        reset_at,
    })
}

/// Reads a `Retry-After` header given in seconds
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_u64(headers, "retry-after").map(Duration::from_secs)
}

/// Time until `X-RateLimit-Reset`, when the header names a future instant
fn reset_delay(headers: &HeaderMap) -> Option<Duration> {
    let reset_at = parse_rate_headers(headers)?.reset_at?;
    (reset_at - Utc::now()).to_std().ok()
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn create_test_config() -> ClientConfig {
        ClientConfig {
            crawler_name: "TestCrawler".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/about".to_string(),
            contact_email: "admin@example.com".to_string(),
            ..ClientConfig::default()
        }
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_build_http_client() {
        let config = create_test_config();
        assert!(build_http_client(&config).is_ok());
    }

    #[test]
    fn test_user_agent_format() {
        let config = create_test_config();
        assert_eq!(
            user_agent_string(&config),
            "TestCrawler/1.0 (+https://example.com/about; admin@example.com)"
        );
    }

    #[test]
    fn test_classify_server_error_is_transient() {
        let err = classify_status(StatusCode::BAD_GATEWAY, &HeaderMap::new(), "item 1", Some(1));
        assert!(err.is_transient());
    }

    #[test]
    fn test_classify_429_with_retry_after() {
        let err = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            &headers(&[("retry-after", "7")]),
            "item 1",
            Some(1),
        );
        match err {
            FetchError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_403_exhausted_quota_is_rate_limited() {
        let err = classify_status(
            StatusCode::FORBIDDEN,
            &headers(&[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", "1700000000")]),
            "graphql",
            None,
        );
        assert!(matches!(err, FetchError::RateLimited { .. }));
    }

    #[test]
    fn test_classify_plain_403_is_permanent() {
        let err = classify_status(StatusCode::FORBIDDEN, &HeaderMap::new(), "graphql", None);
        assert!(matches!(err, FetchError::Permanent { .. }));
    }

    #[test]
    fn test_classify_404() {
        let item = classify_status(StatusCode::NOT_FOUND, &HeaderMap::new(), "item 9", Some(9));
        assert!(item.is_not_found());

        let query = classify_status(StatusCode::NOT_FOUND, &HeaderMap::new(), "graphql", None);
        assert!(matches!(query, FetchError::Permanent { .. }));
    }

    #[test]
    fn test_parse_rate_headers() {
        let snapshot = parse_rate_headers(&headers(&[
            ("x-ratelimit-remaining", "42"),
            ("x-ratelimit-reset", "1700000000"),
        ]))
        .unwrap();
        assert_eq!(snapshot.remaining, 42);
        assert_eq!(snapshot.reset_at.unwrap().timestamp(), 1_700_000_000);

        assert!(parse_rate_headers(&HeaderMap::new()).is_none());
    }
}
