//! HTTP client for the remote sync authority
//!
//! Records go to `PUT {server_url}/records/{id}`; queue entries go to their
//! own endpoint with their own method. Responses are classified into
//! `RemoteError` by `classify_response`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{RequestBuilder, Url};
use serde_json::{json, Value};
use tracing::debug;

use super::{
    CredentialProvider, QueueTransport, RemoteError, RemoteResult, RemoteSync, MIN_RATE_LIMIT_WAIT,
};
use crate::config::Config;
use crate::models::{HttpMethod, QueueEntry};

/// reqwest-based implementation of `RemoteSync` and `QueueTransport`
#[derive(Debug, Clone)]
pub struct HttpSyncClient {
    client: reqwest::Client,
    base_url: Url,
    rate_limit_floor: Duration,
}

impl HttpSyncClient {
    /// Create a client for `base_url`
    ///
    /// `request_timeout` bounds every call; `rate_limit_floor` is the wait
    /// assumed when a 429 response carries no retry hint.
    pub fn new(base_url: &str, request_timeout: Duration, rate_limit_floor: Duration) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid server URL: {}", base_url))?;

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("fieldsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            rate_limit_floor,
        })
    }

    /// Create a client from the configured server URL and timeouts
    pub fn from_config(config: &Config) -> Result<Self> {
        let server_url = config
            .server_url
            .as_deref()
            .context("Server URL not configured")?;
        Self::new(server_url, config.request_timeout(), config.rate_limit_floor())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL for a single record, with the id percent-encoded as one segment
    pub fn record_url(&self, id: &str) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Failed(format!("Server URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .push("records")
            .push(id);
        Ok(url)
    }

    /// Resolve a queue entry's endpoint against the server URL
    pub fn resolve_endpoint(&self, target: &str) -> RemoteResult<Url> {
        if target.starts_with("http://") || target.starts_with("https://") {
            return Url::parse(target)
                .map_err(|e| RemoteError::Failed(format!("Invalid endpoint '{}': {}", target, e)));
        }

        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(target.trim_start_matches('/'))
            .map_err(|e| RemoteError::Failed(format!("Invalid endpoint '{}': {}", target, e)))
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<()> {
        let response = request.send().await.map_err(describe_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();

        classify_response(
            status.as_u16(),
            retry_after.as_deref(),
            &body,
            self.rate_limit_floor,
        )
    }
}

#[async_trait]
impl RemoteSync for HttpSyncClient {
    async fn sync_record(
        &self,
        credentials: &dyn CredentialProvider,
        id: &str,
        payload: &Value,
        last_modified: DateTime<Utc>,
    ) -> RemoteResult<()> {
        let token = credentials.get_token().await.ok_or(RemoteError::Auth)?;
        let url = self.record_url(id)?;

        let body = json!({
            "id": id,
            "payload": payload,
            "lastModified": last_modified.to_rfc3339_opts(SecondsFormat::Millis, true),
        });

        debug!("PUT {}", url);
        self.send(self.client.put(url).bearer_auth(token).json(&body))
            .await
    }
}

#[async_trait]
impl QueueTransport for HttpSyncClient {
    async fn deliver(
        &self,
        credentials: &dyn CredentialProvider,
        entry: &QueueEntry,
    ) -> RemoteResult<()> {
        let token = credentials.get_token().await.ok_or(RemoteError::Auth)?;
        let url = self.resolve_endpoint(&entry.target_endpoint)?;

        debug!("{} {} ({})", entry.method, url, entry.category);
        let mut request = match entry.method {
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
        }
        .bearer_auth(token);

        let mut has_content_type = false;
        for (name, value) in &entry.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| RemoteError::Failed(format!("Invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| RemoteError::Failed(format!("Invalid header value for '{}': {}", name, e)))?;
            has_content_type |= name == CONTENT_TYPE;
            request = request.header(name, value);
        }
        if !has_content_type {
            request = request.header(CONTENT_TYPE, "application/json");
        }

        self.send(request.body(entry.body.clone())).await
    }
}

/// Map a non-success HTTP response onto a `RemoteError`
///
/// 2xx is success. 401 and the session-expired statuses 419/440 need
/// re-authentication. 429 is a rate limit whose wait comes from the
/// `Retry-After` header (seconds or HTTP date), then a `retryAfter` /
/// `retry_after` JSON body field, then `default_wait`. The wait is never
/// shorter than `MIN_RATE_LIMIT_WAIT`.
pub fn classify_response(
    status: u16,
    retry_after: Option<&str>,
    body: &str,
    default_wait: Duration,
) -> RemoteResult<()> {
    match status {
        200..=299 => Ok(()),
        401 | 419 | 440 => Err(RemoteError::Auth),
        429 => {
            let wait = retry_after
                .and_then(parse_retry_after_header)
                .or_else(|| parse_retry_after_body(body))
                .unwrap_or(default_wait)
                .max(MIN_RATE_LIMIT_WAIT);
            Err(RemoteError::RateLimited { retry_after: wait })
        }
        _ => Err(RemoteError::Failed(describe_status(status, body))),
    }
}

fn parse_retry_after_header(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let secs = (at.with_timezone(&Utc) - Utc::now()).num_seconds().max(0);
    Some(Duration::from_secs(secs as u64))
}

fn parse_retry_after_body(body: &str) -> Option<Duration> {
    let value: Value = serde_json::from_str(body).ok()?;
    let secs = value
        .get("retryAfter")
        .or_else(|| value.get("retry_after"))?
        .as_f64()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs(secs.ceil() as u64))
    } else {
        None
    }
}

fn describe_status(status: u16, body: &str) -> String {
    // Prefer a server-provided message when the body is JSON
    let message = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.get("message")
            .or_else(|| v.get("error"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    });

    match message {
        Some(message) => format!("Server returned {}: {}", status, message),
        None => format!("Server returned {}", status),
    }
}

fn describe_transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Failed("Request timed out".to_string())
    } else if e.is_connect() {
        RemoteError::Failed(format!("Could not connect to sync server: {}", e))
    } else {
        RemoteError::Failed(format!("Request failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::StaticCredentials;
    use std::collections::BTreeMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use uuid::Uuid;

    const FLOOR: Duration = Duration::from_secs(60);

    #[test]
    fn test_classify_success() {
        assert_eq!(classify_response(200, None, "", FLOOR), Ok(()));
        assert_eq!(classify_response(204, None, "", FLOOR), Ok(()));
    }

    #[test]
    fn test_classify_auth() {
        assert_eq!(classify_response(401, None, "", FLOOR), Err(RemoteError::Auth));
        assert_eq!(classify_response(419, None, "", FLOOR), Err(RemoteError::Auth));
        assert_eq!(classify_response(440, None, "", FLOOR), Err(RemoteError::Auth));
    }

    #[test]
    fn test_classify_rate_limit_hints() {
        let from_header = classify_response(429, Some("45"), "", FLOOR);
        assert_eq!(
            from_header,
            Err(RemoteError::RateLimited {
                retry_after: Duration::from_secs(45)
            })
        );

        let from_body = classify_response(429, None, r#"{"retryAfter": 12}"#, FLOOR);
        assert_eq!(
            from_body,
            Err(RemoteError::RateLimited {
                retry_after: Duration::from_secs(12)
            })
        );

        let snake_case = classify_response(429, None, r#"{"retry_after": 7.2}"#, FLOOR);
        assert_eq!(
            snake_case,
            Err(RemoteError::RateLimited {
                retry_after: Duration::from_secs(8)
            })
        );

        let absent = classify_response(429, None, "slow down", FLOOR);
        assert_eq!(absent, Err(RemoteError::RateLimited { retry_after: FLOOR }));
    }

    #[test]
    fn test_classify_rate_limit_zero_hint_is_raised() {
        let past_date = classify_response(429, Some("Wed, 21 Oct 2015 07:28:00 GMT"), "", FLOOR);
        assert_eq!(
            past_date,
            Err(RemoteError::RateLimited {
                retry_after: MIN_RATE_LIMIT_WAIT
            })
        );

        let zero_header = classify_response(429, Some("0"), "", FLOOR);
        assert_eq!(
            zero_header,
            Err(RemoteError::RateLimited {
                retry_after: MIN_RATE_LIMIT_WAIT
            })
        );

        let zero_body = classify_response(429, None, r#"{"retryAfter": 0}"#, FLOOR);
        assert_eq!(
            zero_body,
            Err(RemoteError::RateLimited {
                retry_after: MIN_RATE_LIMIT_WAIT
            })
        );
    }

    #[test]
    fn test_classify_other_failures() {
        match classify_response(500, None, r#"{"message": "database down"}"#, FLOOR) {
            Err(RemoteError::Failed(msg)) => {
                assert!(msg.contains("500"));
                assert!(msg.contains("database down"));
            }
            other => panic!("unexpected: {:?}", other),
        }

        match classify_response(404, None, "<html>", FLOOR) {
            Err(RemoteError::Failed(msg)) => assert_eq!(msg, "Server returned 404"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_record_url_encodes_id() {
        let client =
            HttpSyncClient::new("https://sync.example.com/api/", FLOOR, FLOOR).unwrap();
        let url = client.record_url("site 1/a").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sync.example.com/api/records/site%201%2Fa"
        );
    }

    #[test]
    fn test_resolve_endpoint() {
        let client = HttpSyncClient::new("https://sync.example.com/api", FLOOR, FLOOR).unwrap();

        assert_eq!(
            client.resolve_endpoint("/reports").unwrap().as_str(),
            "https://sync.example.com/api/reports"
        );
        assert_eq!(
            client
                .resolve_endpoint("https://media.example.com/upload")
                .unwrap()
                .as_str(),
            "https://media.example.com/upload"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpSyncClient::new("not a url", FLOOR, FLOOR).is_err());
    }

    #[tokio::test]
    async fn test_missing_token_skips_network() {
        // Nothing listens here; an attempted call would fail as Failed, not Auth
        let client = HttpSyncClient::new("http://127.0.0.1:9", FLOOR, FLOOR).unwrap();
        let creds = StaticCredentials::new(None);

        let result = client
            .sync_record(&creds, "r1", &json!({}), Utc::now())
            .await;
        assert_eq!(result, Err(RemoteError::Auth));
    }

    /// Serve one canned response and return the raw request text
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];

            // Read headers, then exactly Content-Length bytes of body
            let header_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before headers");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
            let content_length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < header_end + content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }

            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&buf).to_string()
        });

        (base, handle)
    }

    #[tokio::test]
    async fn test_sync_record_sends_last_modified_and_token() {
        let (base, server) =
            serve_once("HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n").await;
        let client = HttpSyncClient::new(&base, Duration::from_secs(5), FLOOR).unwrap();
        let creds = StaticCredentials::new(Some("tok-1".to_string()));
        let last_modified = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();

        client
            .sync_record(&creds, "r1", &json!({"reading": 3}), last_modified)
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("PUT /records/r1 "));
        assert!(request.to_lowercase().contains("authorization: bearer tok-1"));
        assert!(request.contains("\"lastModified\":\"2023-11-14T22:13:20.123Z\""));
        assert!(request.contains("\"reading\":3"));
    }

    #[tokio::test]
    async fn test_sync_record_maps_rate_limit() {
        let (base, server) = serve_once(
            "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 45\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let client = HttpSyncClient::new(&base, Duration::from_secs(5), FLOOR).unwrap();
        let creds = StaticCredentials::new(Some("tok".to_string()));

        let result = client
            .sync_record(&creds, "r1", &json!({}), Utc::now())
            .await;
        assert_eq!(
            result,
            Err(RemoteError::RateLimited {
                retry_after: Duration::from_secs(45)
            })
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_deliver_queue_entry() {
        let (base, server) = serve_once(
            "HTTP/1.1 201 Created\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let client = HttpSyncClient::new(&base, Duration::from_secs(5), FLOOR).unwrap();
        let creds = StaticCredentials::new(Some("tok".to_string()));

        let mut headers = BTreeMap::new();
        headers.insert("X-Category".to_string(), "report".to_string());
        let entry = QueueEntry {
            id: Uuid::new_v4(),
            target_endpoint: "/reports".to_string(),
            method: HttpMethod::Post,
            headers,
            body: r#"{"pages":2}"#.to_string(),
            category: "report".to_string(),
            enqueued_at: Utc::now(),
            retry_count: 0,
        };

        client.deliver(&creds, &entry).await.unwrap();

        let request = server.await.unwrap();
        let lower = request.to_lowercase();
        assert!(request.starts_with("POST /reports "));
        assert!(lower.contains("x-category: report"));
        assert!(lower.contains("content-type: application/json"));
        assert!(request.ends_with(r#"{"pages":2}"#));
    }
}
