use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_BACKOFF_MS: u64 = 1_000;
pub const MAX_DOCUMENT_SIZE: usize = 10 * 1024 * 1024; // 10MB

const USER_AGENT: &str = concat!("feedsync/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur while retrieving a feed document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No complete response within the configured timeout; the transfer was dropped
    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Relay answered, but with an empty body or an unusable envelope
    #[error("Unusable relay response: {0}")]
    BadRelayResponse(String),
    /// Every intermediary and the final direct attempt failed
    #[error("All retrieval routes failed for {url}: {}", join_failures(.failures))]
    AllRoutesFailed {
        url: String,
        failures: Vec<RouteFailure>,
    },
}

/// Why one retrieval route (an intermediary or the direct fetch) failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteFailure {
    pub route: String,
    pub reason: String,
}

impl std::fmt::Display for RouteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.route, self.reason)
    }
}

fn join_failures(failures: &[RouteFailure]) -> String {
    failures
        .iter()
        .map(RouteFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A relay that fetches arbitrary URLs on our behalf.
///
/// The target URL is percent-encoded and appended to `url_prefix`. Relays that
/// wrap the document in a JSON object name the field holding it in `envelope`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Intermediary {
    pub name: String,
    pub url_prefix: String,
    #[serde(default)]
    pub envelope: Option<String>,
}

impl Intermediary {
    pub fn request_url(&self, target: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
        format!("{}{}", self.url_prefix, encoded)
    }

    /// Public relays tried in order when direct fetches are not possible.
    pub fn defaults() -> Vec<Intermediary> {
        vec![
            Intermediary {
                name: "allorigins".to_string(),
                url_prefix: "https://api.allorigins.win/get?url=".to_string(),
                envelope: Some("contents".to_string()),
            },
            Intermediary {
                name: "corsproxy".to_string(),
                url_prefix: "https://corsproxy.io/?url=".to_string(),
                envelope: None,
            },
            Intermediary {
                name: "codetabs".to_string(),
                url_prefix: "https://api.codetabs.com/v1/proxy?quest=".to_string(),
                envelope: None,
            },
        ]
    }
}

/// Read-only knobs shared by every concurrent fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub backoff: Duration,
    pub max_document_bytes: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            max_document_bytes: MAX_DOCUMENT_SIZE,
        }
    }
}

/// Retrieves a feed document by URL.
///
/// The sync pipeline is generic over this trait and never knows whether the
/// document came straight from the origin or through a relay.
pub trait DocumentFetcher: Send + Sync {
    fn fetch_document(&self, url: &str)
        -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Fetches documents straight from their origin.
#[derive(Debug, Clone)]
pub struct DirectFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl DirectFetcher {
    pub fn new(client: reqwest::Client, settings: FetchSettings) -> Self {
        Self { client, settings }
    }
}

impl DocumentFetcher for DirectFetcher {
    async fn fetch_document(&self, url: &str) -> Result<String, FetchError> {
        get_text(&self.client, url, &self.settings).await
    }
}

/// Fetches documents through a prioritized list of intermediaries, for
/// environments that cannot reach arbitrary origins directly.
///
/// Intermediaries are tried strictly in order, sleeping `backoff` after each
/// failure. When all of them failed, one direct fetch is attempted as a last
/// resort before giving up with [`FetchError::AllRoutesFailed`].
#[derive(Debug, Clone)]
pub struct RelayFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
    intermediaries: Vec<Intermediary>,
}

impl RelayFetcher {
    pub fn new(
        client: reqwest::Client,
        settings: FetchSettings,
        intermediaries: Vec<Intermediary>,
    ) -> Self {
        Self {
            client,
            settings,
            intermediaries,
        }
    }

    async fn fetch_via(&self, relay: &Intermediary, url: &str) -> Result<String, FetchError> {
        let body = get_text(&self.client, &relay.request_url(url), &self.settings).await?;
        let document = match relay.envelope.as_deref() {
            Some(field) => unwrap_envelope(body, field)?,
            None => body,
        };
        if document.trim().is_empty() {
            return Err(FetchError::BadRelayResponse("empty body".to_string()));
        }
        Ok(document)
    }
}

impl DocumentFetcher for RelayFetcher {
    async fn fetch_document(&self, url: &str) -> Result<String, FetchError> {
        let mut failures = Vec::with_capacity(self.intermediaries.len() + 1);

        for relay in &self.intermediaries {
            tracing::debug!(feed = %url, relay = %relay.name, "Fetching through relay");
            match self.fetch_via(relay, url).await {
                Ok(document) => return Ok(document),
                Err(e) => {
                    tracing::warn!(
                        feed = %url,
                        relay = %relay.name,
                        error = %e,
                        backoff_ms = self.settings.backoff.as_millis() as u64,
                        "Relay failed, trying next route"
                    );
                    failures.push(RouteFailure {
                        route: relay.name.clone(),
                        reason: e.to_string(),
                    });
                    tokio::time::sleep(self.settings.backoff).await;
                }
            }
        }

        tracing::debug!(feed = %url, "All relays failed, attempting direct fetch");
        match get_text(&self.client, url, &self.settings).await {
            Ok(document) => Ok(document),
            Err(e) => {
                failures.push(RouteFailure {
                    route: "direct".to_string(),
                    reason: e.to_string(),
                });
                Err(FetchError::AllRoutesFailed {
                    url: url.to_string(),
                    failures,
                })
            }
        }
    }
}

/// The fetch backend selected by configuration.
#[derive(Debug, Clone)]
pub enum Fetcher {
    Direct(DirectFetcher),
    Relay(RelayFetcher),
}

impl Fetcher {
    /// Builds the backend: relayed when `restricted`, direct otherwise.
    pub fn new(
        settings: FetchSettings,
        restricted: bool,
        intermediaries: Vec<Intermediary>,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(if restricted {
            Fetcher::Relay(RelayFetcher::new(client, settings, intermediaries))
        } else {
            Fetcher::Direct(DirectFetcher::new(client, settings))
        })
    }
}

impl DocumentFetcher for Fetcher {
    async fn fetch_document(&self, url: &str) -> Result<String, FetchError> {
        match self {
            Fetcher::Direct(direct) => direct.fetch_document(url).await,
            Fetcher::Relay(relay) => relay.fetch_document(url).await,
        }
    }
}

/// GET `url` and return the body as text, bounded by `settings.timeout` for
/// the whole exchange. On timeout the in-flight request future is dropped,
/// which aborts the transfer.
async fn get_text(
    client: &reqwest::Client,
    url: &str,
    settings: &FetchSettings,
) -> Result<String, FetchError> {
    let exchange = async {
        let response = client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, settings.max_document_bytes).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    };

    tokio::time::timeout(settings.timeout, exchange)
        .await
        .map_err(|_| FetchError::Timeout {
            url: url.to_string(),
            timeout_ms: settings.timeout.as_millis() as u64,
        })?
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // EDGE-005: connection dropped mid-body
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

/// Extracts the document from a JSON envelope such as
/// `{"contents": "<rss>...</rss>", "status": {"http_code": 200}}`.
///
/// A body that is not a JSON object is taken to be the raw document, since
/// some relays only wrap responses on certain endpoints.
fn unwrap_envelope(body: String, field: &str) -> Result<String, FetchError> {
    if !body.trim_start().starts_with('{') {
        return Ok(body);
    }
    let Ok(envelope) = serde_json::from_str::<Value>(&body) else {
        return Ok(body);
    };

    if let Some(code) = envelope
        .pointer("/status/http_code")
        .and_then(Value::as_u64)
    {
        if !(200..300).contains(&code) {
            return Err(FetchError::HttpStatus(code as u16));
        }
    }

    match envelope.get(field) {
        Some(Value::String(document)) => Ok(document.clone()),
        Some(Value::Null) | None => Err(FetchError::BadRelayResponse(format!(
            "envelope has no `{field}` field"
        ))),
        Some(other) => Err(FetchError::BadRelayResponse(format!(
            "envelope field `{field}` is not a string ({})",
            json_type(other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn fast_settings() -> FetchSettings {
        FetchSettings {
            timeout: Duration::from_millis(500),
            backoff: Duration::from_millis(10),
            max_document_bytes: MAX_DOCUMENT_SIZE,
        }
    }

    fn relay(server: &MockServer, name: &str, envelope: Option<&str>) -> Intermediary {
        Intermediary {
            name: name.to_string(),
            url_prefix: format!("{}/{}?url=", server.uri(), name),
            envelope: envelope.map(str::to_string),
        }
    }

    #[test]
    fn test_request_url_encodes_target() {
        let relay = Intermediary {
            name: "r".into(),
            url_prefix: "https://relay.test/get?url=".into(),
            envelope: None,
        };
        assert_eq!(
            relay.request_url("https://example.com/feed?a=1&b=2"),
            "https://relay.test/get?url=https%3A%2F%2Fexample.com%2Ffeed%3Fa%3D1%26b%3D2"
        );
    }

    #[test]
    fn test_unwrap_envelope_shapes() {
        let wrapped = r#"{"contents":"<rss/>","status":{"http_code":200}}"#.to_string();
        assert_eq!(unwrap_envelope(wrapped, "contents").unwrap(), "<rss/>");

        // Raw document passes through
        assert_eq!(
            unwrap_envelope("<rss/>".to_string(), "contents").unwrap(),
            "<rss/>"
        );

        let missing = r#"{"other":"x"}"#.to_string();
        assert!(matches!(
            unwrap_envelope(missing, "contents"),
            Err(FetchError::BadRelayResponse(_))
        ));

        let upstream_404 = r#"{"contents":null,"status":{"http_code":404}}"#.to_string();
        assert!(matches!(
            unwrap_envelope(upstream_404, "contents"),
            Err(FetchError::HttpStatus(404))
        ));
    }

    #[tokio::test]
    async fn test_direct_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&server)
            .await;

        let fetcher = DirectFetcher::new(reqwest::Client::new(), fast_settings());
        let body = fetcher
            .fetch_document(&format!("{}/feed.xml", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, VALID_RSS);
    }

    #[tokio::test]
    async fn test_direct_fetch_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = DirectFetcher::new(reqwest::Client::new(), fast_settings());
        match fetcher.fetch_document(&server.uri()).await {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_direct_fetch_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let settings = FetchSettings {
            timeout: Duration::from_millis(100),
            ..fast_settings()
        };
        let fetcher = DirectFetcher::new(reqwest::Client::new(), settings);
        let started = std::time::Instant::now();
        match fetcher.fetch_document(&server.uri()).await {
            Err(FetchError::Timeout { timeout_ms, .. }) => assert_eq!(timeout_ms, 100),
            other => panic!("Expected Timeout, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_direct_fetch_size_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(2048)))
            .mount(&server)
            .await;

        let settings = FetchSettings {
            max_document_bytes: 1024,
            ..fast_settings()
        };
        let fetcher = DirectFetcher::new(reqwest::Client::new(), settings);
        assert!(matches!(
            fetcher.fetch_document(&server.uri()).await,
            Err(FetchError::ResponseTooLarge)
        ));
    }

    #[tokio::test]
    async fn test_relay_falls_through_to_envelope_relay() {
        let server = MockServer::start().await;
        let target = "https://origin.example/feed.xml";

        Mock::given(path("/broken"))
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/wrapped"))
            .and(query_param("url", target))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "contents": VALID_RSS,
                "status": { "http_code": 200 }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/never"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(0)
            .mount(&server)
            .await;

        let fetcher = RelayFetcher::new(
            reqwest::Client::new(),
            fast_settings(),
            vec![
                relay(&server, "broken", None),
                relay(&server, "wrapped", Some("contents")),
                relay(&server, "never", None),
            ],
        );

        let body = fetcher.fetch_document(target).await.unwrap();
        assert_eq!(body, VALID_RSS);
    }

    #[tokio::test]
    async fn test_relay_raw_body_used_directly() {
        let server = MockServer::start().await;
        Mock::given(path("/raw"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&server)
            .await;

        let fetcher = RelayFetcher::new(
            reqwest::Client::new(),
            fast_settings(),
            vec![relay(&server, "raw", None)],
        );
        let body = fetcher
            .fetch_document("https://origin.example/rss")
            .await
            .unwrap();
        assert_eq!(body, VALID_RSS);
    }

    #[tokio::test]
    async fn test_relay_uses_direct_as_last_resort() {
        let server = MockServer::start().await;
        Mock::given(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = RelayFetcher::new(
            reqwest::Client::new(),
            fast_settings(),
            vec![relay(&server, "down", None)],
        );
        let body = fetcher
            .fetch_document(&format!("{}/feed.xml", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, VALID_RSS);
    }

    #[tokio::test]
    async fn test_all_routes_failed_collects_every_reason() {
        let server = MockServer::start().await;
        Mock::given(path("/first"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(path("/second"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&server)
            .await;
        Mock::given(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = RelayFetcher::new(
            reqwest::Client::new(),
            fast_settings(),
            vec![relay(&server, "first", None), relay(&server, "second", None)],
        );

        let err = fetcher
            .fetch_document(&format!("{}/feed.xml", server.uri()))
            .await
            .unwrap_err();

        match &err {
            FetchError::AllRoutesFailed { failures, .. } => {
                let routes: Vec<_> = failures.iter().map(|f| f.route.as_str()).collect();
                assert_eq!(routes, vec!["first", "second", "direct"]);
                assert!(failures[0].reason.contains("503"));
                assert!(failures[1].reason.contains("empty body"));
                assert!(failures[2].reason.contains("404"));
            }
            other => panic!("Expected AllRoutesFailed, got {:?}", other),
        }

        let message = err.to_string();
        assert!(message.contains("first: HTTP error: status 503"));
        assert!(message.contains("direct: HTTP error: status 404"));
    }

    #[tokio::test]
    async fn test_fetcher_selects_backend() {
        let direct = Fetcher::new(FetchSettings::default(), false, Intermediary::defaults()).unwrap();
        assert!(matches!(direct, Fetcher::Direct(_)));

        let relay = Fetcher::new(FetchSettings::default(), true, Intermediary::defaults()).unwrap();
        assert!(matches!(relay, Fetcher::Relay(_)));
    }
}
