use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::{DetailSource, FeedMutations, FeedSource};
use crate::config::Config;
use crate::model::{
    Cursor, DetailRecord, FeedContext, FeedItem, ItemId, ItemType, Page, SourceError,
};

const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Errors building an [`HttpSource`].
#[derive(Debug, Error)]
pub enum HttpSourceError {
    #[error("Invalid base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
    #[error("Base URL cannot carry a path")]
    CannotBeABase,
}

/// JSON REST implementation of the feed, mutation and detail collaborators.
///
/// Reads retry transient failures (transport errors, timeouts, 5xx) with
/// exponential backoff. Mutations are sent once: a pin toggle is not
/// idempotent, so a blind retry could flip the flag twice.
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: Url,
    token: Option<SecretString>,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for HttpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSource")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl HttpSource {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, HttpSourceError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(HttpSourceError::CannotBeABase);
        }
        let is_local = matches!(
            base_url.host_str(),
            Some("localhost") | Some("127.0.0.1") | Some("[::1]")
        );
        if base_url.scheme() != "https" && !is_local {
            return Err(HttpSourceError::InsecureBaseUrl);
        }

        Ok(Self {
            client,
            base_url,
            token: None,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Build from the loaded configuration.
    pub fn from_config(client: reqwest::Client, config: &Config) -> Result<Self, HttpSourceError> {
        let mut source = Self::new(client, &config.api_base_url)?
            .with_timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .with_max_retries(config.max_retries);
        source.token = config.api_token.clone();
        Ok(source)
    }

    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Base delay of the read backoff (doubles per attempt).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::Network("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => {
                request.header("Authorization", format!("Bearer {}", token.expose_secret()))
            }
            None => request,
        }
    }

    /// GET a JSON document, retrying transient failures.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SourceError> {
        let mut retry_count = 0;

        loop {
            let request = self.authorize(self.client.get(url.clone()));
            match self.send(request).await {
                Ok(bytes) => return decode(&bytes),
                Err(e) if e.is_retryable() && retry_count < self.max_retries => {
                    let delay = self.retry_delay * 2u32.pow(retry_count);
                    tracing::debug!(
                        url = %url,
                        error = %e,
                        retry = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying feed request after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a mutation once. Returns the raw body.
    async fn send_once(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Vec<u8>, SourceError> {
        self.send(self.authorize(request)).await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, SourceError> {
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| SourceError::Network("request timed out".to_string()))?
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_limited_bytes(response, MAX_RESPONSE_SIZE)
                .await
                .unwrap_or_default();
            return Err(status_error(status.as_u16(), &body));
        }

        read_limited_bytes(response, MAX_RESPONSE_SIZE).await
    }
}

/// Map a non-2xx status onto the error taxonomy.
fn status_error(status: u16, body: &[u8]) -> SourceError {
    match status {
        404 | 410 => SourceError::NotFound,
        409 => SourceError::Conflict,
        400 | 422 => {
            let message = String::from_utf8_lossy(body).trim().to_string();
            SourceError::Validation(if message.is_empty() {
                format!("status {status}")
            } else {
                message
            })
        }
        _ => SourceError::Network(format!("HTTP error: status {status}")),
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SourceError> {
    serde_json::from_slice(bytes)
        .map_err(|e| SourceError::Network(format!("malformed response: {e}")))
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, SourceError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(SourceError::Network(format!(
                "response too large (exceeds {limit} bytes)"
            )));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| SourceError::Network(e.to_string()))?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(SourceError::Network(format!(
                "response too large (exceeds {limit} bytes)"
            )));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

fn json_body(
    request: reqwest::RequestBuilder,
    value: &serde_json::Value,
) -> Result<reqwest::RequestBuilder, SourceError> {
    let body = serde_json::to_vec(value)
        .map_err(|e| SourceError::Validation(format!("unserializable payload: {e}")))?;
    Ok(request
        .header("Content-Type", "application/json")
        .body(body))
}

#[async_trait]
impl FeedSource for HttpSource {
    async fn fetch_page(
        &self,
        cursor: Option<&Cursor>,
        context: &FeedContext,
    ) -> Result<Page, SourceError> {
        let mut url = self.endpoint(&["feed"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("context", context.as_str());
            if let Some(cursor) = cursor {
                query.append_pair("cursor", &cursor.0);
            }
        }
        self.get_json(url).await
    }

    async fn fetch_pinned(&self, context: &FeedContext) -> Result<Vec<FeedItem>, SourceError> {
        let mut url = self.endpoint(&["feed", "pinned"])?;
        url.query_pairs_mut()
            .append_pair("context", context.as_str());
        self.get_json(url).await
    }
}

#[async_trait]
impl FeedMutations for HttpSource {
    async fn toggle_pin(
        &self,
        id: &ItemId,
        item_type: ItemType,
        context: &FeedContext,
    ) -> Result<FeedItem, SourceError> {
        let url = self.endpoint(&["feed", "pin"])?;
        let payload = serde_json::json!({
            "id": id,
            "type": item_type,
            "context": context,
        });
        let bytes = self
            .send_once(json_body(self.client.post(url), &payload)?)
            .await?;
        decode(&bytes)
    }

    async fn delete_item(&self, source_id: &str, item_type: ItemType) -> Result<(), SourceError> {
        let url = self.endpoint(&[item_type.as_str(), source_id])?;
        self.send_once(self.client.delete(url)).await?;
        Ok(())
    }

    async fn edit_item(
        &self,
        item_type: ItemType,
        payload: &serde_json::Value,
    ) -> Result<FeedItem, SourceError> {
        let url = self.endpoint(&[item_type.as_str()])?;
        let bytes = self
            .send_once(json_body(self.client.put(url), payload)?)
            .await?;
        decode(&bytes)
    }
}

#[async_trait]
impl DetailSource for HttpSource {
    async fn fetch_full(
        &self,
        item_type: ItemType,
        source_id: &str,
    ) -> Result<DetailRecord, SourceError> {
        let url = self.endpoint(&[item_type.as_str(), source_id])?;
        self.get_json(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE_JSON: &str = r#"{
        "items": [{
            "id": "f-1", "type": "notes", "source_id": "1", "title": "Groceries",
            "created_at": "2024-01-01T10:00:00Z", "updated_at": "2024-01-01T10:00:00Z",
            "pinned": false, "feed_context": "main", "extra_fields": {}
        }],
        "nextCursor": "c-2"
    }"#;

    const ITEM_JSON: &str = r#"{
        "id": "f-1", "type": "notes", "source_id": "1", "title": "Groceries",
        "created_at": "2024-01-01T10:00:00Z", "updated_at": "2024-01-02T10:00:00Z",
        "pinned": true, "feed_context": "main", "extra_fields": {}
    }"#;

    fn source(server: &MockServer) -> HttpSource {
        HttpSource::new(reqwest::Client::new(), &server.uri())
            .unwrap()
            .with_retry_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_rejects_insecure_remote_base_url() {
        let err = HttpSource::new(reqwest::Client::new(), "http://api.example.com").unwrap_err();
        assert!(matches!(err, HttpSourceError::InsecureBaseUrl));
        assert!(HttpSource::new(reqwest::Client::new(), "https://api.example.com/v1").is_ok());
        assert!(HttpSource::new(reqwest::Client::new(), "not a url").is_err());
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let source =
            HttpSource::new(reqwest::Client::new(), "https://api.example.com/v1/").unwrap();
        let url = source.endpoint(&["weight", "abc 1"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/weight/abc%201");
    }

    #[test]
    fn test_debug_masks_token() {
        let source = HttpSource::new(reqwest::Client::new(), "https://api.example.com")
            .unwrap()
            .with_token(SecretString::from("super-secret".to_string()));
        let debug = format!("{:?}", source);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_fetch_page_threads_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(query_param("context", "main"))
            .and(query_param("cursor", "c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_JSON))
            .expect(1)
            .mount(&server)
            .await;

        let page = source(&server)
            .fetch_page(Some(&Cursor("c-1".into())), &FeedContext::main())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_cursor, Some(Cursor("c-2".into())));
    }

    #[tokio::test]
    async fn test_read_retries_server_errors() {
        use wiremock::matchers::any;

        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let pinned = source(&server)
            .fetch_pinned(&FeedContext::main())
            .await
            .unwrap();
        assert!(pinned.is_empty());
    }

    #[tokio::test]
    async fn test_read_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&server)
            .await;

        let err = source(&server)
            .fetch_page(None, &FeedContext::main())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Network(_)));
    }

    #[tokio::test]
    async fn test_toggle_pin_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/feed/pin"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&server)
            .await;

        let err = source(&server)
            .toggle_pin(&ItemId::from("f-1"), ItemType::Notes, &FeedContext::main())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_toggle_pin_sends_body_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/feed/pin"))
            .and(header("Authorization", "Bearer t0ken"))
            .and(body_json(serde_json::json!({
                "id": "f-1", "type": "notes", "context": "main"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(ITEM_JSON))
            .mount(&server)
            .await;

        let item = source(&server)
            .with_token(SecretString::from("t0ken".to_string()))
            .toggle_pin(&ItemId::from("f-1"), ItemType::Notes, &FeedContext::main())
            .await
            .unwrap();
        assert!(item.pinned);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/weight/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/notes"))
            .respond_with(ResponseTemplate::new(422).set_body_string("title is required"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/weight/stale"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let source = source(&server);
        assert_eq!(
            source.delete_item("gone", ItemType::Weight).await,
            Err(SourceError::NotFound)
        );
        assert_eq!(
            source.delete_item("stale", ItemType::Weight).await,
            Err(SourceError::Conflict)
        );
        assert_eq!(
            source
                .edit_item(ItemType::Notes, &serde_json::json!({"source_id": "1"}))
                .await
                .unwrap_err(),
            SourceError::Validation("title is required".to_string())
        );
    }

    #[tokio::test]
    async fn test_fetch_full_decodes_detail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gym_sessions/42"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"type": "gym_sessions", "source_id": "42",
                    "updated_at": "2024-01-01T10:00:00Z", "body": {"exercises": []}}"#,
            ))
            .mount(&server)
            .await;

        let record = source(&server)
            .fetch_full(ItemType::GymSessions, "42")
            .await
            .unwrap();
        assert_eq!(record.source_id, "42");
        assert_eq!(record.body["exercises"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_malformed_json_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = source(&server)
            .with_max_retries(0)
            .fetch_pinned(&FeedContext::main())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Network(msg) if msg.contains("malformed")));
    }
}
