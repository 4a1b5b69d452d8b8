//! GitHub GraphQL client and query descriptors
//!
//! The descriptors mirror the historical-metric queries: stargazers, forks
//! and pull requests are paged in ascending creation order so a walk can stop
//! at the first entry past its cutoff; commit totals come from a single
//! `history(until:)` count; contributors page through commit authors.

use crate::client::http::{classify_status, classify_transport, parse_rate_headers};
use crate::client::{EdgeShape, FetchError, PageSource, QueryDescriptor, Response};
use crate::ConfigError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::fmt;
use url::Url;

/// An `owner/name` repository reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parses `https://github.com/owner/name[.git][/...]` or `owner/name`
    ///
    /// # Examples
    ///
    /// ```
    /// use tidepool::client::RepoRef;
    ///
    /// let repo = RepoRef::parse("https://github.com/rust-lang/rust.git").unwrap();
    /// assert_eq!(repo.to_string(), "rust-lang/rust");
    /// ```
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let input = input.trim();
        let invalid = || ConfigError::InvalidUrl(format!("Not a GitHub repository: '{}'", input));

        let segments: Vec<String> = if input.contains("://") {
            let url = Url::parse(input).map_err(|_| invalid())?;
            match url.host_str() {
                Some("github.com") | Some("www.github.com") => {}
                _ => return Err(invalid()),
            }
            url.path_segments()
                .map(|s| s.filter(|p| !p.is_empty()).map(str::to_string).collect())
                .unwrap_or_default()
        } else {
            let parts: Vec<String> = input.split('/').map(str::to_string).collect();
            if parts.len() != 2 {
                return Err(invalid());
            }
            parts
        };

        if segments.len() < 2 {
            return Err(invalid());
        }

        let owner = segments[0].clone();
        let name = segments[1].trim_end_matches(".git").to_string();
        let valid = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !valid(&owner) || !valid(&name) {
            return Err(invalid());
        }

        Ok(Self { owner, name })
    }

    fn base_variables(&self) -> Map<String, Value> {
        let mut vars = Map::new();
        vars.insert("owner".to_string(), Value::String(self.owner.clone()));
        vars.insert("name".to_string(), Value::String(self.name.clone()));
        vars
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

const REPOSITORY_INFO: &str = r#"
query RepositoryInfo($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    createdAt
    nameWithOwner
  }
}
"#;

const STARGAZERS: &str = r#"
query Stargazers($owner: String!, $name: String!, $first: Int!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    stargazers(first: $first, after: $cursor, orderBy: {field: STARRED_AT, direction: ASC}) {
      totalCount
      pageInfo { endCursor hasNextPage }
      edges { starredAt node { login } }
    }
  }
}
"#;

const FORKS: &str = r#"
query Forks($owner: String!, $name: String!, $first: Int!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    forks(first: $first, after: $cursor, orderBy: {field: CREATED_AT, direction: ASC}) {
      totalCount
      pageInfo { endCursor hasNextPage }
      nodes { createdAt }
    }
  }
}
"#;

const PULL_REQUESTS: &str = r#"
query PullRequests($owner: String!, $name: String!, $first: Int!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    pullRequests(first: $first, after: $cursor, states: [OPEN, CLOSED, MERGED], orderBy: {field: CREATED_AT, direction: ASC}) {
      totalCount
      pageInfo { endCursor hasNextPage }
      nodes { createdAt }
    }
  }
}
"#;

const COMMIT_TOTAL: &str = r#"
query CommitTotal($owner: String!, $name: String!, $until: GitTimestamp!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    defaultBranchRef {
      target {
        ... on Commit {
          history(until: $until, after: $cursor) { totalCount }
        }
      }
    }
  }
}
"#;

const COMMIT_AUTHORS: &str = r#"
query CommitAuthors($owner: String!, $name: String!, $until: GitTimestamp!, $first: Int!, $cursor: String) {
  repository(owner: $owner, name: $name) {
    defaultBranchRef {
      target {
        ... on Commit {
          history(first: $first, after: $cursor, until: $until) {
            pageInfo { endCursor hasNextPage }
            nodes { author { user { login } email } }
          }
        }
      }
    }
  }
}
"#;

fn path(segments: &[&str]) -> Vec<String> {
    segments.iter().map(|s| s.to_string()).collect()
}

fn git_timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Repository metadata lookup (`createdAt`)
pub fn repository_info(repo: &RepoRef) -> QueryDescriptor {
    QueryDescriptor {
        label: format!("{} info", repo),
        document: REPOSITORY_INFO.to_string(),
        variables: repo.base_variables(),
        connection: path(&["repository"]),
        shape: EdgeShape::Nodes { timestamp: None },
    }
}

/// Stargazers in ascending `starredAt` order
pub fn stargazers(repo: &RepoRef, page_size: u32) -> QueryDescriptor {
    let mut variables = repo.base_variables();
    variables.insert("first".to_string(), json!(page_size));
    QueryDescriptor {
        label: format!("{} stargazers", repo),
        document: STARGAZERS.to_string(),
        variables,
        connection: path(&["repository", "stargazers"]),
        shape: EdgeShape::Edges {
            timestamp: "starredAt".to_string(),
        },
    }
}

/// Forks in ascending `createdAt` order
pub fn forks(repo: &RepoRef, page_size: u32) -> QueryDescriptor {
    let mut variables = repo.base_variables();
    variables.insert("first".to_string(), json!(page_size));
    QueryDescriptor {
        label: format!("{} forks", repo),
        document: FORKS.to_string(),
        variables,
        connection: path(&["repository", "forks"]),
        shape: EdgeShape::Nodes {
            timestamp: Some("createdAt".to_string()),
        },
    }
}

/// Pull requests in every state, ascending `createdAt` order
pub fn pull_requests(repo: &RepoRef, page_size: u32) -> QueryDescriptor {
    let mut variables = repo.base_variables();
    variables.insert("first".to_string(), json!(page_size));
    QueryDescriptor {
        label: format!("{} pull requests", repo),
        document: PULL_REQUESTS.to_string(),
        variables,
        connection: path(&["repository", "pullRequests"]),
        shape: EdgeShape::Nodes {
            timestamp: Some("createdAt".to_string()),
        },
    }
}

/// Total commits on the default branch up to `until`
pub fn commit_total(repo: &RepoRef, until: DateTime<Utc>) -> QueryDescriptor {
    let mut variables = repo.base_variables();
    variables.insert("until".to_string(), git_timestamp(until));
    QueryDescriptor {
        label: format!("{} commits", repo),
        document: COMMIT_TOTAL.to_string(),
        variables,
        connection: path(&["repository", "defaultBranchRef", "target", "history"]),
        shape: EdgeShape::Nodes { timestamp: None },
    }
}

/// Commit authors on the default branch up to `until`
pub fn commit_authors(repo: &RepoRef, until: DateTime<Utc>, page_size: u32) -> QueryDescriptor {
    let mut variables = repo.base_variables();
    variables.insert("until".to_string(), git_timestamp(until));
    variables.insert("first".to_string(), json!(page_size));
    QueryDescriptor {
        label: format!("{} contributors", repo),
        document: COMMIT_AUTHORS.to_string(),
        variables,
        connection: path(&["repository", "defaultBranchRef", "target", "history"]),
        shape: EdgeShape::Nodes { timestamp: None },
    }
}

/// Client for the GitHub GraphQL endpoint
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    endpoint: Url,
    token: Option<String>,
}

impl GitHubClient {
    /// Creates a client; `token` is sent as a bearer token when present
    pub fn new(
        http: Client,
        endpoint: &str,
        token: Option<String>,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            http,
            endpoint: Url::parse(endpoint)?,
            token,
        })
    }
}

/// Maps a GraphQL `errors` array to a fetch error
fn classify_graphql_errors(errors: &[Value], context: &str) -> FetchError {
    let kinds: Vec<&str> = errors
        .iter()
        .filter_map(|e| e.get("type").and_then(Value::as_str))
        .collect();

    if kinds.iter().any(|k| *k == "RATE_LIMITED") {
        return FetchError::RateLimited {
            context: context.to_string(),
            retry_after: None,
        };
    }

    let messages: Vec<&str> = errors
        .iter()
        .filter_map(|e| e.get("message").and_then(Value::as_str))
        .collect();

    FetchError::Permanent {
        context: context.to_string(),
        reason: format!("GraphQL errors: {}", messages.join(", ")),
    }
}

#[async_trait]
impl PageSource for GitHubClient {
    async fn execute(
        &self,
        query: &QueryDescriptor,
        cursor: Option<&str>,
    ) -> Result<Response<Value>, FetchError> {
        let context = query.label.as_str();
        let payload = json!({
            "query": query.document,
            "variables": query.variables_with_cursor(cursor),
        });

        let mut request = self.http.post(self.endpoint.clone()).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(e, context))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response.headers(), context, None));
        }

        let rate = parse_rate_headers(response.headers());
        let mut body: Value = response
            .json()
            .await
            .map_err(|e| classify_transport(e, context))?;

        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(classify_graphql_errors(errors, context));
            }
        }

        match body.get_mut("data").map(Value::take) {
            Some(data) if !data.is_null() => Ok(Response { body: data, rate }),
            _ => Err(FetchError::Permanent {
                context: context.to_string(),
                reason: "response has no data".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_repo_ref_parse_variants() {
        let expected = RepoRef {
            owner: "octo".to_string(),
            name: "hello".to_string(),
        };
        assert_eq!(RepoRef::parse("https://github.com/octo/hello").unwrap(), expected);
        assert_eq!(RepoRef::parse("https://github.com/octo/hello/").unwrap(), expected);
        assert_eq!(RepoRef::parse("https://github.com/octo/hello.git").unwrap(), expected);
        assert_eq!(
            RepoRef::parse("https://www.github.com/octo/hello/tree/main").unwrap(),
            expected
        );
        assert_eq!(RepoRef::parse("octo/hello").unwrap(), expected);
    }

    #[test]
    fn test_repo_ref_rejects_invalid() {
        assert!(RepoRef::parse("https://gitlab.com/octo/hello").is_err());
        assert!(RepoRef::parse("https://github.com/octo").is_err());
        assert!(RepoRef::parse("octo").is_err());
        assert!(RepoRef::parse("a/b/c").is_err());
        assert!(RepoRef::parse("octo/hel lo").is_err());
    }

    #[test]
    fn test_commit_total_until_variable() {
        let repo = RepoRef::parse("octo/hello").unwrap();
        let until = Utc.with_ymd_and_hms(2023, 1, 31, 23, 59, 59).unwrap();
        let query = commit_total(&repo, until);
        assert_eq!(query.variables["until"], json!("2023-01-31T23:59:59Z"));
        assert_eq!(query.variables["owner"], json!("octo"));
    }

    #[test]
    fn test_stargazers_descriptor_shape() {
        let repo = RepoRef::parse("octo/hello").unwrap();
        let query = stargazers(&repo, 50);
        assert_eq!(query.connection, vec!["repository", "stargazers"]);
        assert_eq!(query.variables["first"], json!(50));
        assert!(query.document.contains("STARRED_AT"));
    }

    #[test]
    fn test_graphql_rate_limited_error() {
        let errors = vec![json!({ "type": "RATE_LIMITED", "message": "API rate limit exceeded" })];
        assert!(classify_graphql_errors(&errors, "q").is_transient());
    }

    #[test]
    fn test_graphql_not_found_error_is_permanent() {
        let errors = vec![json!({
            "type": "NOT_FOUND",
            "message": "Could not resolve to a Repository"
        })];
        let err = classify_graphql_errors(&errors, "q");
        assert!(matches!(err, FetchError::Permanent { ref reason, .. } if reason.contains("Could not resolve")));
    }
}
