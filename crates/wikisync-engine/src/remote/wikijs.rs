//! # Wiki.js Client
//!
//! [`RemoteDocumentApi`] over the Wiki.js 2.x GraphQL API.
//!
//! ## Mapping
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  key "runbooks/dns.md"  ↔  page path "runbooks/dns" in the locale      │
//! │                                                                         │
//! │  list_changed_since  → pages.list(orderBy: UPDATED), filtered locally  │
//! │  list_keys           → pages.list                                      │
//! │  stat / read         → pages.singleByPath(path, locale)                │
//! │  write               → pages.update(id, ...) or pages.create(...)      │
//! │  delete              → pages.delete(id)                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retries
//! Each request is retried with exponential backoff on network errors,
//! timeouts, 429 and 5xx responses, up to `remote.max_retries` attempts.
//! GraphQL-level errors are not retried.

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DocumentMetadata, RemoteDocumentApi, RemoteEntry};
use crate::config::RemoteSettings;
use crate::error::{SyncError, SyncResult};
use wikisync_core::{ItemShape, SyncKey};

/// Wiki.js error code for a missing page.
const PAGE_NOT_FOUND_CODE: i64 = 6003;

// =============================================================================
// GraphQL Documents
// =============================================================================

const LIST_PAGES: &str = r#"
query ListPages($locale: String) {
  pages {
    list(locale: $locale, orderBy: UPDATED, orderByDirection: DESC) {
      id
      path
      locale
      updatedAt
    }
  }
}"#;

const PAGE_BY_PATH: &str = r#"
query PageByPath($path: String!, $locale: String!) {
  pages {
    singleByPath(path: $path, locale: $locale) {
      id
      path
      content
      updatedAt
    }
  }
}"#;

const CREATE_PAGE: &str = r#"
mutation CreatePage($content: String!, $description: String!, $locale: String!,
                    $path: String!, $tags: [String]!, $title: String!) {
  pages {
    create(content: $content, description: $description, editor: "markdown",
           isPublished: true, isPrivate: false, locale: $locale, path: $path,
           tags: $tags, title: $title) {
      responseResult { succeeded errorCode slug message }
      page { id path updatedAt }
    }
  }
}"#;

const UPDATE_PAGE: &str = r#"
mutation UpdatePage($id: Int!, $content: String!) {
  pages {
    update(id: $id, content: $content) {
      responseResult { succeeded errorCode slug message }
      page { id path updatedAt }
    }
  }
}"#;

const DELETE_PAGE: &str = r#"
mutation DeletePage($id: Int!) {
  pages {
    delete(id: $id) {
      responseResult { succeeded errorCode slug message }
    }
  }
}"#;

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
    #[serde(default)]
    extensions: Option<Value>,
}

impl GraphQlError {
    fn is_not_found(&self) -> bool {
        let code = self.extensions.as_ref().and_then(|ext| {
            ext.get("exception")
                .and_then(|e| e.get("code"))
                .or_else(|| ext.get("code"))
                .and_then(Value::as_i64)
        });
        code == Some(PAGE_NOT_FOUND_CODE) || self.message.contains("does not exist")
    }
}

#[derive(Debug, Deserialize)]
struct PagesData<T> {
    pages: T,
}

#[derive(Debug, Deserialize)]
struct ListResult {
    list: Vec<PageListItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageListItem {
    #[allow(dead_code)]
    id: i64,
    path: String,
    #[serde(default)]
    locale: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SingleResult {
    single_by_path: Option<Page>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page {
    id: i64,
    #[serde(default)]
    content: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CreateResult {
    create: PageResponse,
}

#[derive(Debug, Deserialize)]
struct UpdateResult {
    update: PageResponse,
}

#[derive(Debug, Deserialize)]
struct DeleteResult {
    delete: DefaultResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageResponse {
    response_result: ResponseStatus,
    page: Option<Page>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefaultResponse {
    response_result: ResponseStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseStatus {
    succeeded: bool,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

impl ResponseStatus {
    fn check(&self, op: &str, key: &SyncKey) -> SyncResult<()> {
        if self.succeeded {
            return Ok(());
        }
        Err(SyncError::Remote(format!(
            "{} {} rejected (code {}): {}",
            op,
            key,
            self.error_code.unwrap_or_default(),
            self.message.as_deref().unwrap_or("no message")
        )))
    }
}

// =============================================================================
// Client
// =============================================================================

/// Wiki.js GraphQL client.
#[derive(Debug, Clone)]
pub struct WikiJsClient {
    client: reqwest::Client,
    endpoint: url::Url,
    api_key: Option<String>,
    locale: String,
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl WikiJsClient {
    /// Creates a client from the `[remote]` settings.
    pub fn from_settings(settings: &RemoteSettings) -> SyncResult<Self> {
        let raw = settings
            .url
            .as_deref()
            .ok_or_else(|| SyncError::config("remote.url", "required for the wikijs backend"))?;
        let endpoint = url::Url::parse(raw)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        info!(endpoint = %endpoint, locale = %settings.locale, "Wiki.js client configured");

        Ok(WikiJsClient {
            client,
            endpoint,
            api_key: settings.api_key.clone(),
            locale: settings.locale.clone(),
            max_retries: settings.max_retries.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_secs(settings.max_backoff_secs),
        })
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Posts one GraphQL document, retrying transient failures.
    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
    ) -> SyncResult<GraphQlResponse<T>> {
        let body = GraphQlRequest { query, variables };
        let body = &body;
        let attempts = &AtomicU32::new(0);
        let max_retries = self.max_retries;

        backoff::future::retry(self.backoff(), || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match self.send_once(body).await {
                Ok(response) => Ok(response),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    warn!(?e, attempt, "Wiki request failed, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        body: &GraphQlRequest<'_>,
    ) -> SyncResult<GraphQlResponse<T>> {
        let mut request = self.client.post(self.endpoint.clone()).json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(SyncError::RemoteStatus {
                status: status.as_u16(),
                message: text,
            });
        }

        Ok(serde_json::from_str(&text)?)
    }

    /// Unwraps `data`, turning GraphQL errors into a remote error.
    fn into_data<T>(response: GraphQlResponse<T>) -> SyncResult<T> {
        if let Some(first) = response.errors.first() {
            return Err(SyncError::Remote(first.message.clone()));
        }
        response
            .data
            .ok_or_else(|| SyncError::Remote("response has no data".into()))
    }

    async fn list_pages(&self) -> SyncResult<Vec<PageListItem>> {
        let response: GraphQlResponse<PagesData<ListResult>> = self
            .execute(LIST_PAGES, json!({ "locale": self.locale }))
            .await?;
        let items = Self::into_data(response)?.pages.list;

        Ok(items
            .into_iter()
            .filter(|item| item.locale.as_deref().map_or(true, |l| l == self.locale))
            .collect())
    }

    async fn page(&self, key: &SyncKey) -> SyncResult<Option<Page>> {
        let response: GraphQlResponse<PagesData<SingleResult>> = self
            .execute(
                PAGE_BY_PATH,
                json!({ "path": key.page_path(), "locale": self.locale }),
            )
            .await?;

        if response.errors.iter().any(GraphQlError::is_not_found) {
            return Ok(None);
        }
        Ok(Self::into_data(response)?.pages.single_by_path)
    }

    fn entry(key: &SyncKey, updated_at: DateTime<Utc>) -> RemoteEntry {
        RemoteEntry {
            key: key.clone(),
            modified_at: updated_at,
            shape: ItemShape::File,
        }
    }

    fn list_item_entry(item: PageListItem) -> Option<RemoteEntry> {
        match SyncKey::from_page_path(&item.path) {
            Ok(key) => Some(RemoteEntry {
                key,
                modified_at: item.updated_at,
                shape: ItemShape::File,
            }),
            Err(e) => {
                warn!(?e, path = %item.path, "Skipping page with unsupported path");
                None
            }
        }
    }
}

#[async_trait]
impl RemoteDocumentApi for WikiJsClient {
    async fn list_changed_since(
        &self,
        cursor: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<RemoteEntry>> {
        let pages = self.list_pages().await?;
        Ok(pages
            .into_iter()
            .filter(|p| cursor.map_or(true, |c| p.updated_at >= c))
            .filter_map(Self::list_item_entry)
            .collect())
    }

    async fn list_keys(&self) -> SyncResult<Vec<SyncKey>> {
        let pages = self.list_pages().await?;
        Ok(pages
            .into_iter()
            .filter_map(Self::list_item_entry)
            .map(|e| e.key)
            .collect())
    }

    async fn stat(&self, key: &SyncKey) -> SyncResult<Option<RemoteEntry>> {
        Ok(self
            .page(key)
            .await?
            .map(|page| Self::entry(key, page.updated_at)))
    }

    async fn read(&self, key: &SyncKey) -> SyncResult<Option<Vec<u8>>> {
        Ok(self
            .page(key)
            .await?
            .map(|page| page.content.unwrap_or_default().into_bytes()))
    }

    async fn write(
        &self,
        key: &SyncKey,
        bytes: &[u8],
        metadata: &DocumentMetadata,
    ) -> SyncResult<RemoteEntry> {
        let content = std::str::from_utf8(bytes)
            .map_err(|e| SyncError::transfer(key, format!("document is not UTF-8: {}", e)))?;

        let response = match self.page(key).await? {
            Some(existing) => {
                let response: GraphQlResponse<PagesData<UpdateResult>> = self
                    .execute(UPDATE_PAGE, json!({ "id": existing.id, "content": content }))
                    .await?;
                let result = Self::into_data(response)?.pages.update;
                result.response_result.check("update", key)?;
                result
            }
            None => {
                let response: GraphQlResponse<PagesData<CreateResult>> = self
                    .execute(
                        CREATE_PAGE,
                        json!({
                            "content": content,
                            "description": metadata.description,
                            "locale": self.locale,
                            "path": key.page_path(),
                            "tags": metadata.tags,
                            "title": metadata.title,
                        }),
                    )
                    .await?;
                let result = Self::into_data(response)?.pages.create;
                result.response_result.check("create", key)?;
                result
            }
        };

        debug!(key = %key, size = bytes.len(), "Page written");
        let updated_at = response.page.map_or_else(Utc::now, |p| p.updated_at);
        Ok(Self::entry(key, updated_at))
    }

    async fn delete(&self, key: &SyncKey) -> SyncResult<()> {
        let Some(existing) = self.page(key).await? else {
            return Ok(());
        };

        let response: GraphQlResponse<PagesData<DeleteResult>> = self
            .execute(DELETE_PAGE, json!({ "id": existing.id }))
            .await?;
        Self::into_data(response)?
            .pages
            .delete
            .response_result
            .check("delete", key)?;

        debug!(key = %key, "Page deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_list() {
        let raw = r#"{
            "data": { "pages": { "list": [
                { "id": 7, "path": "runbooks/dns", "locale": "en", "updatedAt": "2024-03-01T10:00:00.000Z" },
                { "id": 8, "path": "home", "locale": "fr", "updatedAt": "2024-03-02T10:00:00Z" }
            ] } }
        }"#;

        let parsed: GraphQlResponse<PagesData<ListResult>> = serde_json::from_str(raw).unwrap();
        let items = WikiJsClient::into_data(parsed).unwrap().pages.list;
        assert_eq!(items.len(), 2);

        let entry = WikiJsClient::list_item_entry(items.into_iter().next().unwrap()).unwrap();
        assert_eq!(entry.key.as_str(), "runbooks/dns.md");
        assert_eq!(entry.modified_at.timestamp(), 1_709_287_200);
    }

    #[test]
    fn test_not_found_error_is_recognized() {
        let raw = r#"{
            "data": { "pages": { "singleByPath": null } },
            "errors": [ { "message": "This page does not exist.",
                          "extensions": { "exception": { "code": 6003 } } } ]
        }"#;
        let parsed: GraphQlResponse<PagesData<SingleResult>> = serde_json::from_str(raw).unwrap();
        assert!(parsed.errors.iter().any(GraphQlError::is_not_found));

        let other = GraphQlError {
            message: "Forbidden".into(),
            extensions: None,
        };
        assert!(!other.is_not_found());
    }

    #[test]
    fn test_rejected_mutation_is_an_error() {
        let raw = r#"{ "data": { "pages": { "update": {
            "responseResult": { "succeeded": false, "errorCode": 6002, "slug": "x", "message": "Invalid path" },
            "page": null
        } } } }"#;
        let parsed: GraphQlResponse<PagesData<UpdateResult>> = serde_json::from_str(raw).unwrap();
        let result = WikiJsClient::into_data(parsed).unwrap().pages.update;
        let key = SyncKey::new("a.md").unwrap();
        let err = result.response_result.check("update", &key).unwrap_err();
        assert!(err.to_string().contains("6002"));
    }

    #[test]
    fn test_client_requires_url() {
        let settings = RemoteSettings::default();
        let err = WikiJsClient::from_settings(&settings).unwrap_err();
        assert!(err.is_config_error());

        let settings = RemoteSettings {
            url: Some("https://wiki.example.com/graphql".into()),
            ..Default::default()
        };
        assert!(WikiJsClient::from_settings(&settings).is_ok());
    }
}
