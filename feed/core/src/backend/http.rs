//! HTTP Content Service
//!
//! JSON-over-HTTP client for a remote feed service.
//!
//! # Endpoints
//!
//! - `GET  /users/{user}/feed?limit=N[&after=THREAD]` - feed pages
//! - `GET  /threads/{thread}/children` - reply chain
//! - `POST /threads/lookup` - threads by id, body `{"ids": [...]}`
//!
//! Response bodies wrap their payload (`{"threads": [...]}`,
//! `{"items": [...]}`) so the service can add fields without breaking
//! older clients.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::traits::{ContentError, ContentService};
use crate::content::{ContentItem, ThreadEntity, ThreadId, UserId};

/// Default request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct ThreadsEnvelope {
    #[serde(default)]
    threads: Vec<ThreadEntity>,
}

#[derive(Deserialize)]
struct ItemsEnvelope {
    #[serde(default)]
    items: Vec<ContentItem>,
}

#[derive(Serialize)]
struct LookupRequest<'a> {
    ids: &'a [ThreadId],
}

/// Content service reached over HTTP
#[derive(Clone, Debug)]
pub struct HttpContentService {
    /// Service root, without trailing slash
    base_url: String,
    /// Parsed service root that endpoint paths are appended to
    base: url::Url,
    /// HTTP client
    http_client: reqwest::Client,
}

impl HttpContentService {
    /// Create a client for `base_url`
    ///
    /// # Errors
    ///
    /// Returns `ContentError::Transport` if the base URL is not a valid
    /// http(s) URL or the client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ContentError> {
        let trimmed = base_url.trim_end_matches('/');
        let base = url::Url::parse(trimmed)
            .map_err(|e| ContentError::Transport(format!("invalid base url '{base_url}': {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ContentError::Transport(format!(
                "unsupported scheme '{}' for content service",
                base.scheme()
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ContentError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: trimmed.to_string(),
            base,
            http_client,
        })
    }

    /// Service root
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Append path segments to the service root; each segment is
    /// percent-encoded, so ids never split into extra path components
    fn endpoint(&self, segments: &[&str]) -> Result<url::Url, ContentError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ContentError::Transport(format!("base url '{}' cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn feed_url(&self, user: &UserId) -> Result<url::Url, ContentError> {
        self.endpoint(&["users", user.as_str(), "feed"])
    }

    fn children_url(&self, thread: &ThreadId) -> Result<url::Url, ContentError> {
        self.endpoint(&["threads", thread.as_str(), "children"])
    }

    fn lookup_url(&self) -> Result<url::Url, ContentError> {
        self.endpoint(&["threads", "lookup"])
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<T, ContentError> {
        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url, status = status.as_u16(), "Content service request failed");
            return Err(ContentError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        response.json::<T>().await.map_err(map_reqwest_error)
    }

    async fn feed_page(
        &self,
        user: &UserId,
        after: Option<&ThreadId>,
        limit: usize,
    ) -> Result<Vec<ThreadEntity>, ContentError> {
        let url = self.feed_url(user)?;
        let mut query = vec![("limit", limit.to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let request = self.http_client.get(url.clone()).query(&query);
        let envelope: ThreadsEnvelope = self.get_json(request, url.as_str()).await?;
        Ok(envelope.threads)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ContentError {
    if e.is_decode() {
        ContentError::Decode(e.to_string())
    } else {
        ContentError::Transport(e.to_string())
    }
}

#[async_trait]
impl ContentService for HttpContentService {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch_feed(
        &self,
        user: &UserId,
        limit: usize,
    ) -> Result<Vec<ThreadEntity>, ContentError> {
        self.feed_page(user, None, limit).await
    }

    async fn fetch_children(&self, thread: &ThreadId) -> Result<Vec<ContentItem>, ContentError> {
        let url = self.children_url(thread)?;
        let request = self.http_client.get(url.clone());
        match self.get_json::<ItemsEnvelope>(request, url.as_str()).await {
            Ok(envelope) => Ok(envelope.items),
            Err(ContentError::Status { status: 404, .. }) => {
                Err(ContentError::ThreadNotFound(thread.clone()))
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_more(
        &self,
        user: &UserId,
        after: Option<&ThreadId>,
        limit: usize,
    ) -> Result<Vec<ThreadEntity>, ContentError> {
        self.feed_page(user, after, limit).await
    }

    async fn fetch_threads(&self, ids: &[ThreadId]) -> Result<Vec<ThreadEntity>, ContentError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.lookup_url()?;
        let request = self.http_client.post(url.clone()).json(&LookupRequest { ids });
        let envelope: ThreadsEnvelope = self.get_json(request, url.as_str()).await?;
        Ok(envelope.threads)
    }
}
