//! Integration tests for the GitHub GraphQL client and cursor walks

use chrono::{TimeZone, Utc};
use serde_json::json;
use std::time::Duration;
use tidepool::client::{build_http_client, github, GitHubClient, PageSource, RepoRef};
use tidepool::config::ClientConfig;
use tidepool::crawler::{
    Aggregation, Backoff, CreatedOnOrBefore, CursorWalker, IncludeAll, Metric, RetryPolicy,
};
use tidepool::FetchError;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> GitHubClient {
    let http = build_http_client(&ClientConfig::default()).expect("Failed to build client");
    GitHubClient::new(
        http,
        &format!("{}/graphql", server.uri()),
        Some("test-token".to_string()),
    )
    .expect("Bad endpoint")
}

fn quick_backoff() -> Backoff {
    Backoff::new(RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        jitter: false,
        safety_buffer: 0,
        reset_buffer: Duration::ZERO,
    })
}

fn repo() -> RepoRef {
    RepoRef::parse("octo/hello").unwrap()
}

fn stargazer_page(dates: &[&str], end_cursor: Option<&str>, has_next: bool) -> serde_json::Value {
    let edges: Vec<_> = dates
        .iter()
        .enumerate()
        .map(|(i, d)| json!({ "starredAt": d, "node": { "login": format!("user{}", i) } }))
        .collect();
    json!({
        "data": {
            "repository": {
                "stargazers": {
                    "totalCount": 99,
                    "pageInfo": { "endCursor": end_cursor, "hasNextPage": has_next },
                    "edges": edges
                }
            }
        }
    })
}

#[tokio::test]
async fn test_execute_sends_query_and_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "variables": { "owner": "octo", "name": "hello", "first": 50, "cursor": null }
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-remaining", "4999")
                .insert_header("x-ratelimit-reset", "1700000000")
                .set_body_json(stargazer_page(&["2023-01-05T10:00:00Z"], Some("c1"), false)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let response = client
        .query(&github::stargazers(&repo(), 50), None)
        .await
        .unwrap();

    let rate = response.rate.expect("rate headers");
    assert_eq!(rate.remaining, 4999);
    assert_eq!(rate.reset_at, Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));

    let page = response.body;
    assert_eq!(page.edges.len(), 1);
    assert_eq!(page.total_count, Some(99));
    assert!(!page.has_more);
}

#[tokio::test]
async fn test_graphql_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({ "variables": { "name": "missing" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "repository": null },
            "errors": [{ "type": "NOT_FOUND", "message": "Could not resolve to a Repository" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({ "variables": { "name": "busy" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{ "type": "RATE_LIMITED", "message": "API rate limit exceeded" }]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);

    let missing = RepoRef::parse("octo/missing").unwrap();
    let err = client
        .execute(&github::repository_info(&missing), None)
        .await
        .unwrap_err();
    match err {
        FetchError::Permanent { reason, .. } => assert!(reason.contains("Could not resolve")),
        other => panic!("Expected permanent failure, got {:?}", other),
    }

    let busy = RepoRef::parse("octo/busy").unwrap();
    let err = client
        .execute(&github::repository_info(&busy), None)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::RateLimited { .. }));
}

#[tokio::test]
async fn test_exhausted_quota_403_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", "1700000000"),
        )
        .mount(&server)
        .await;

    let err = client_for(&server)
        .execute(&github::repository_info(&repo()), None)
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_walk_stops_at_first_excluded_edge() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({ "variables": { "cursor": null } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(stargazer_page(
            &["2022-12-01T00:00:00Z", "2023-01-10T00:00:00Z"],
            Some("p1"),
            true,
        )))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({ "variables": { "cursor": "p1" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(stargazer_page(
            &["2023-01-31T23:59:59Z", "2023-02-01T00:00:00Z", "2023-02-02T00:00:00Z"],
            Some("p2"),
            true,
        )))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let backoff = quick_backoff();
    let walker = CursorWalker::new(&client, &backoff);
    let cutoff = Utc.with_ymd_and_hms(2023, 1, 31, 23, 59, 59).unwrap();

    let metric = walker
        .walk(
            &github::stargazers(&repo(), 100),
            &CreatedOnOrBefore(cutoff),
            &Aggregation::Count,
        )
        .await;

    assert_eq!(metric, Metric::Known(3));
    // The page after "p2" is never requested
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_walk_failure_is_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let backoff = quick_backoff();
    let walker = CursorWalker::new(&client, &backoff);

    let metric = walker
        .walk(&github::forks(&repo(), 100), &IncludeAll, &Aggregation::Count)
        .await;

    assert_eq!(metric, Metric::Unknown);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_walk_with_dangling_next_page_is_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stargazer_page(
            &["2022-12-01T00:00:00Z"],
            None,
            true,
        )))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let backoff = quick_backoff();
    let walker = CursorWalker::new(&client, &backoff);
    let cutoff = Utc.with_ymd_and_hms(2023, 1, 31, 23, 59, 59).unwrap();

    let metric = walker
        .walk(
            &github::stargazers(&repo(), 100),
            &CreatedOnOrBefore(cutoff),
            &Aggregation::Count,
        )
        .await;

    // A truncated count would read as Known(1)
    assert_eq!(metric, Metric::Unknown);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
