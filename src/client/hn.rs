//! Hacker News item client
//!
//! Fetches `{base}/item/{id}.json`. The API answers `null` for ids that have
//! no record, which maps to `FetchError::NotFound`.

use crate::client::http::{classify_status, classify_transport, parse_rate_headers};
use crate::client::types::RawItem;
use crate::client::{FetchError, Item, ItemId, ItemSource, Response};
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

/// Client for the Hacker News Firebase API
#[derive(Debug, Clone)]
pub struct HackerNewsClient {
    http: Client,
    base: Url,
}

impl HackerNewsClient {
    /// Creates a client rooted at `base_url` (e.g. `https://hacker-news.firebaseio.com/v0`)
    pub fn new(http: Client, base_url: &str) -> Result<Self, url::ParseError> {
        // A trailing slash keeps `join` from dropping the last path segment
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(Self { http, base })
    }

    /// Returns the URL for an item
    pub fn item_url(&self, id: ItemId) -> Result<Url, url::ParseError> {
        self.base.join(&format!("item/{}.json", id))
    }
}

#[async_trait]
impl ItemSource for HackerNewsClient {
    async fn fetch(&self, id: ItemId) -> Result<Response<Item>, FetchError> {
        let context = format!("item {}", id);
        let url = self.item_url(id).map_err(|e| FetchError::Permanent {
            context: context.clone(),
            reason: e.to_string(),
        })?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport(e, &context))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response.headers(), &context, Some(id)));
        }

        let rate = parse_rate_headers(response.headers());
        let raw: Option<RawItem> = response
            .json()
            .await
            .map_err(|e| classify_transport(e, &context))?;

        let item = raw.ok_or(FetchError::NotFound { id })?.into_item()?;
        tracing::trace!("Fetched item {} ({:?})", item.id, item.kind);

        Ok(Response { body: item, rate })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_url_with_and_without_trailing_slash() {
        let http = Client::new();
        let plain = HackerNewsClient::new(http.clone(), "https://example.com/v0").unwrap();
        let slashed = HackerNewsClient::new(http, "https://example.com/v0/").unwrap();

        assert_eq!(
            plain.item_url(8863).unwrap().as_str(),
            "https://example.com/v0/item/8863.json"
        );
        assert_eq!(plain.item_url(1).unwrap(), slashed.item_url(1).unwrap());
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HackerNewsClient::new(Client::new(), "not a url").is_err());
    }
}
