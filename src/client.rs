//! Shared HTTP transport for the preprint APIs.
//!
//! One `ApiClient` per API family owns the reqwest client, the base URL,
//! and the optional token header. Pagination dialects live with the source
//! adapters; this layer owns auth, timeouts, retries, and error mapping.

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tokio::time::sleep;
use tracing::warn;

use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_MS: u64 = 500;

pub struct ApiClient {
    client: reqwest::Client,
    base: String,
    auth: Option<String>,
}

impl ApiClient {
    pub fn new(base: &str, token: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            auth: token.map(|t| format!("token {t}")),
        })
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.base, resource.trim_start_matches('/'))
    }

    /// GET `resource` and parse the body as JSON.
    ///
    /// Connection errors, timeouts, and 5xx responses are retried with
    /// exponential backoff; 4xx responses never are. A 400 surfaces the
    /// server's `message` field as [`Error::BadRequest`].
    pub async fn get_json(&self, resource: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = self.url(resource);
        let mut attempt = 0u32;
        loop {
            let mut request = self.client.get(&url);
            if let Some(auth) = &self.auth {
                request = request.header(reqwest::header::AUTHORIZATION, auth);
            }
            if !params.is_empty() {
                request = request.query(params);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(resource, attempt, "request failed ({e}); retrying");
                    sleep(backoff(attempt)).await;
                    continue;
                }
                Err(e) => return Err(Error::Http(e)),
            };

            let status = response.status();
            if status.is_server_error() && attempt < MAX_RETRIES {
                attempt += 1;
                warn!(resource, %status, attempt, "server error; retrying");
                sleep(backoff(attempt)).await;
                continue;
            }
            if status == StatusCode::BAD_REQUEST {
                let message = response
                    .json::<Value>()
                    .await
                    .ok()
                    .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| "malformed request".to_string());
                return Err(Error::BadRequest {
                    resource: resource.to_string(),
                    message,
                });
            }
            if !status.is_success() {
                return Err(Error::Status {
                    resource: resource.to_string(),
                    status: status.as_u16(),
                });
            }
            return Ok(response.json().await?);
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(RETRY_BASE_MS << attempt)
}

/// What one page of a `page`/`page_size` listing means for the crawl.
enum PageStep {
    /// Items to yield; `done` marks a short page (the listing ends here).
    Items { items: Vec<Value>, done: bool },
    /// A single non-list body: a one-shot, unpaginated result.
    OneShot(Value),
    Exhausted,
}

fn classify_page(body: Value, page_size: usize) -> PageStep {
    match body {
        Value::Array(items) => {
            if items.is_empty() {
                PageStep::Exhausted
            } else {
                let done = items.len() < page_size;
                PageStep::Items { items, done }
            }
        }
        other => PageStep::OneShot(other),
    }
}

/// Lazy pager over a figshare-style listing (`page`/`page_size` query
/// params). Pull-based and single-pass: nothing is requested until
/// [`Pager::next_page`] is called, and a consumer that stops early issues
/// no further requests.
pub struct Pager<'a> {
    api: &'a ApiClient,
    resource: String,
    params: Vec<(&'static str, String)>,
    page_size: usize,
    page: usize,
    done: bool,
}

impl<'a> Pager<'a> {
    pub fn new(
        api: &'a ApiClient,
        resource: &str,
        params: Vec<(&'static str, String)>,
        page_size: usize,
    ) -> Self {
        Self {
            api,
            resource: resource.to_string(),
            params,
            page_size,
            page: 1,
            done: false,
        }
    }

    /// The next batch of records, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Value>>> {
        if self.done {
            return Ok(None);
        }
        let mut params = self.params.clone();
        params.push(("page_size", self.page_size.to_string()));
        params.push(("page", self.page.to_string()));
        let body = self.api.get_json(&self.resource, &params).await?;
        match classify_page(body, self.page_size) {
            PageStep::Items { items, done } => {
                self.done = done;
                self.page += 1;
                Ok(Some(items))
            }
            PageStep::OneShot(value) => {
                self.done = true;
                Ok(Some(vec![value]))
            }
            PageStep::Exhausted => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_list_ends_the_crawl() {
        assert!(matches!(
            classify_page(json!([]), 500),
            PageStep::Exhausted
        ));
    }

    #[test]
    fn short_page_is_the_last_page() {
        match classify_page(json!([{"id": 1}, {"id": 2}]), 500) {
            PageStep::Items { items, done } => {
                assert_eq!(items.len(), 2);
                assert!(done);
            }
            _ => panic!("expected items"),
        }
    }

    #[test]
    fn full_page_continues() {
        let body = Value::Array(vec![json!({"id": 1}), json!({"id": 2})]);
        match classify_page(body, 2) {
            PageStep::Items { done, .. } => assert!(!done),
            _ => panic!("expected items"),
        }
    }

    #[test]
    fn single_object_is_a_one_shot_result() {
        assert!(matches!(
            classify_page(json!({"id": 1}), 500),
            PageStep::OneShot(_)
        ));
    }

    #[test]
    fn url_joining_normalizes_slashes() {
        let api = ApiClient::new("https://api.example.org/v2/", None).unwrap();
        assert_eq!(
            api.url("/articles/7"),
            "https://api.example.org/v2/articles/7"
        );
        assert_eq!(api.url("account"), "https://api.example.org/v2/account");
    }

    #[test]
    fn backoff_grows_exponentially() {
        assert_eq!(backoff(1), Duration::from_millis(1000));
        assert_eq!(backoff(2), Duration::from_millis(2000));
        assert_eq!(backoff(3), Duration::from_millis(4000));
    }
}
