// # Consul Catalog Backend
//
// Implements `CatalogBackend` over the Consul HTTP API.
//
// ## Endpoints
//
// - Register: PUT `/v1/catalog/register`
// - Deregister: PUT `/v1/catalog/deregister` with `{Node, ServiceID}` or `{Node, CheckID}`
// - Watch: GET `/v1/internal/ui/node/<node>?index=<i>&wait=<secs>s`, index from `X-Consul-Index`
//   (node name percent-encoded as a single path segment)
// - Leader probe: GET `/v1/status/leader`
//
// ## Trust Level: Untrusted (Catalog Backend)
//
// - ✅ Makes exactly one HTTP request per call
// - ✅ Maps HTTP status codes to typed errors
// - ❌ NO retry logic (failed writes heal on the next reconcile pass)
// - ❌ NO state beyond the HTTP client (catalog state is owned by `CatalogState`)
//
// ## Security Requirements
//
// - The ACL token NEVER appears in logs or `Debug` output
// - The token is sent only as the `X-Consul-Token` header

mod wire;

use async_trait::async_trait;
use dyncat_core::{CatalogBackend, Error, NodeSnapshot, Result, ServiceRecord};
use reqwest::{Response, StatusCode};
use std::time::Duration;

use wire::{CatalogDeregistration, CatalogRegistration, NodeInfo};

/// Consul's default local agent address
pub const DEFAULT_CONSUL_ADDR: &str = "http://127.0.0.1:8500";

/// Header carrying the ACL token
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Header carrying the blocking query index
const INDEX_HEADER: &str = "X-Consul-Index";

/// Timeout for non-blocking requests
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time granted to a blocking query on top of the requested wait.
/// Consul adds up to wait/16 of jitter before answering.
const WATCH_GRACE: Duration = Duration::from_secs(10);

/// Connection settings for a Consul agent or server
#[derive(Clone, Default)]
pub struct ConsulConfig {
    /// Base URL; a bare `host:port` gets an `http://` scheme
    pub address: Option<String>,
    /// ACL token
    /// ⚠️ NEVER log this value
    pub token: Option<String>,
    /// Log intended writes and deletes instead of sending them
    pub dry_run: bool,
}

impl std::fmt::Debug for ConsulConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulConfig")
            .field("address", &self.address)
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

/// Consul catalog backend
///
/// # Dry-Run Mode
///
/// When `dry_run` is true the backend:
/// - Long-polls the node normally, so the controller sees the real catalog
/// - Logs every register/deregister payload it would have sent
/// - Does **not** change the catalog
pub struct ConsulBackend {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
    dry_run: bool,
}

// Custom Debug implementation that hides the ACL token
impl std::fmt::Debug for ConsulBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulBackend")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<REDACTED>"))
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl ConsulBackend {
    /// Create a backend from connection settings
    ///
    /// An empty token is treated as no token.
    pub fn new(config: ConsulConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = normalize_address(config.address.as_deref().unwrap_or(DEFAULT_CONSUL_ADDR))?;
        let token = config.token.filter(|token| !token.is_empty());

        if config.dry_run {
            tracing::warn!("Consul backend running in DRY-RUN mode - no catalog changes will be made");
        }

        Ok(Self {
            base_url,
            token,
            client,
            dry_run: config.dry_run,
        })
    }

    /// Whether writes and deletes are only logged
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Ask Consul for its raft leader
    ///
    /// Used at startup to fail fast when the catalog is unreachable.
    pub async fn check_leader(&self) -> Result<String> {
        let response = self.send(self.request(reqwest::Method::GET, "/v1/status/leader")).await?;
        let response = check_status(response, "leader lookup").await?;

        let leader: String = response
            .json()
            .await
            .map_err(|e| Error::backend(format!("Failed to parse leader response: {}", e)))?;

        if leader.is_empty() {
            return Err(Error::backend("Consul cluster has no leader"));
        }

        tracing::debug!(leader = %leader, "Consul leader found");
        Ok(leader)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.request(method, format!("{}{}", self.base_url, path)))
    }

    /// URL of the node view, with the node name as one encoded path segment
    fn node_url(&self, node: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| Error::config(format!("Invalid Consul address {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::config(format!("Consul address {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["v1", "internal", "ui", "node", node]);
        Ok(url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Response> {
        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::http(format!("Consul request timed out: {}", e))
            } else {
                Error::http(format!("HTTP request failed: {}", e))
            }
        })
    }

    async fn deregister(&self, body: CatalogDeregistration<'_>, what: &str) -> Result<()> {
        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would send PUT /v1/catalog/deregister with payload: {}",
                serde_json::to_string(&body)?
            );
            return Ok(());
        }

        let response = self
            .send(self.request(reqwest::Method::PUT, "/v1/catalog/deregister").json(&body))
            .await?;
        check_status(response, what).await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogBackend for ConsulBackend {
    async fn write_service(&self, record: &ServiceRecord) -> Result<()> {
        let body = CatalogRegistration::from_record(record);

        if self.dry_run {
            tracing::info!(
                "[DRY-RUN] Would send PUT /v1/catalog/register with payload: {}",
                serde_json::to_string(&body)?
            );
            return Ok(());
        }

        let response = self
            .send(self.request(reqwest::Method::PUT, "/v1/catalog/register").json(&body))
            .await?;
        check_status(response, "service registration").await?;

        tracing::debug!(service_id = %record.service_id, node = %record.check_node, "Registered service");
        Ok(())
    }

    async fn delete_service(&self, service_id: &str, node: &str) -> Result<()> {
        let body = CatalogDeregistration {
            node,
            service_id: Some(service_id),
            check_id: None,
        };
        self.deregister(body, "service deregistration").await
    }

    async fn delete_check(&self, check_id: &str, node: &str) -> Result<()> {
        let body = CatalogDeregistration {
            node,
            service_id: None,
            check_id: Some(check_id),
        };
        self.deregister(body, "check deregistration").await
    }

    async fn watch_node(&self, node: &str, wait_index: u64, wait: Duration) -> Result<NodeSnapshot> {
        let builder = self
            .authorize(self.client.get(self.node_url(node)?))
            .query(&[
                ("index", wait_index.to_string()),
                ("wait", format!("{}s", wait.as_secs())),
            ])
            .timeout(wait + wait / 16 + WATCH_GRACE);

        let response = self.send(builder).await?;
        let index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        // The node only exists once something is registered on it
        if response.status() == StatusCode::NOT_FOUND {
            if let Some(index) = index {
                tracing::debug!(node = %node, index, "Catalog node does not exist yet");
                return Ok(NodeSnapshot {
                    services: Default::default(),
                    index,
                });
            }
        }

        let response = check_status(response, "node watch").await?;
        let index = index.ok_or_else(|| {
            Error::backend(format!("Node watch response carried no {} header", INDEX_HEADER))
        })?;

        let info: NodeInfo = response
            .json()
            .await
            .map_err(|e| Error::backend(format!("Failed to parse node response: {}", e)))?;

        Ok(info.into_snapshot(index))
    }

    fn backend_name(&self) -> &'static str {
        "consul"
    }
}

/// Turn `CONSUL_HTTP_ADDR`-style values into a base URL without a trailing slash
fn normalize_address(address: &str) -> Result<String> {
    let address = address.trim().trim_end_matches('/');
    if address.is_empty() {
        return Err(Error::config("Consul address cannot be empty"));
    }

    if address.contains("://") {
        Ok(address.to_string())
    } else {
        Ok(format!("http://{}", address))
    }
}

/// Pass successful responses through, map the rest to typed errors
async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error response".to_string());

    Err(status_error(status, what, error_text.trim()))
}

fn status_error(status: StatusCode, what: &str, error_text: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::auth(format!(
            "Consul rejected the {}: invalid or insufficient ACL token. Status: {}",
            what, status
        )),
        404 => Error::not_found(format!("Consul {} target not found: {}", what, error_text)),
        429 => Error::rate_limited(format!(
            "Consul rate limit exceeded during {}. Status: {}",
            what, status
        )),
        500..=599 => Error::backend(format!(
            "Consul server error (transient) during {}: {} - {}",
            what, status, error_text
        )),
        _ => Error::backend(format!("Consul {} failed: {} - {}", what, status, error_text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dyncat_core::CheckStatus;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer, dry_run: bool) -> ConsulBackend {
        ConsulBackend::new(ConsulConfig {
            address: Some(server.uri()),
            token: Some("secret-acl-token".into()),
            dry_run,
        })
        .unwrap()
    }

    fn record() -> ServiceRecord {
        let mut record = ServiceRecord::new("orders-master", "orders", "10.0.0.1", 5432);
        record.check_node = "rds".into();
        record.check_status = CheckStatus::Passing;
        record
    }

    #[test]
    fn token_not_exposed_in_debug() {
        let backend = ConsulBackend::new(ConsulConfig {
            address: None,
            token: Some("secret-acl-token".into()),
            dry_run: false,
        })
        .unwrap();

        let debug_str = format!("{:?}", backend);
        assert!(!debug_str.contains("secret-acl-token"));
        assert!(debug_str.contains("ConsulBackend"));

        let config = ConsulConfig {
            token: Some("secret-acl-token".into()),
            ..Default::default()
        };
        assert!(!format!("{:?}", config).contains("secret-acl-token"));
    }

    #[test]
    fn address_normalization() {
        assert_eq!(normalize_address("127.0.0.1:8500").unwrap(), "http://127.0.0.1:8500");
        assert_eq!(
            normalize_address("https://consul.internal/").unwrap(),
            "https://consul.internal"
        );
        assert!(matches!(normalize_address("  "), Err(Error::Config(_))));
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "node watch", ""),
            Error::Authentication(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "node watch", ""),
            Error::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "node watch", ""),
            Error::RateLimited(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "node watch", ""),
            Error::Backend(_)
        ));
    }

    #[tokio::test]
    async fn register_sends_token_and_payload() {
        let server = MockServer::start().await;
        let record = record();

        Mock::given(method("PUT"))
            .and(path("/v1/catalog/register"))
            .and(header("X-Consul-Token", "secret-acl-token"))
            .and(body_json(serde_json::to_value(CatalogRegistration::from_record(&record)).unwrap()))
            .respond_with(ResponseTemplate::new(200).set_body_json(true))
            .expect(1)
            .mount(&server)
            .await;

        backend(&server, false).write_service(&record).await.unwrap();
    }

    #[tokio::test]
    async fn deregister_service_and_check() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/v1/catalog/deregister"))
            .and(body_json(serde_json::json!({"Node": "rds", "ServiceID": "orders-master"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(true))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/catalog/deregister"))
            .and(body_json(serde_json::json!({"Node": "rds", "CheckID": "service:legacy"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(true))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend(&server, false);
        backend.delete_service("orders-master", "rds").await.unwrap();
        backend.delete_check("service:legacy", "rds").await.unwrap();
    }

    #[tokio::test]
    async fn dry_run_sends_no_writes() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let backend = backend(&server, true);
        assert!(backend.is_dry_run());
        backend.write_service(&record()).await.unwrap();
        backend.delete_service("orders-master", "rds").await.unwrap();
        backend.delete_check("service:orders-master", "rds").await.unwrap();
    }

    #[tokio::test]
    async fn watch_reads_index_and_contents() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/internal/ui/node/rds"))
            .and(query_param("index", "7"))
            .and(query_param("wait", "120s"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Consul-Index", "12")
                    .set_body_json(serde_json::json!({
                        "Services": [{"ID": "orders-master", "Service": "orders",
                                      "Address": "10.0.0.1", "Port": 5432}],
                        "Checks": [{"CheckID": "service:orders-master", "Node": "rds",
                                    "Status": "passing", "ServiceID": "orders-master"}]
                    })),
            )
            .mount(&server)
            .await;

        let snapshot = backend(&server, false)
            .watch_node("rds", 7, Duration::from_secs(120))
            .await
            .unwrap();

        assert_eq!(snapshot.index, 12);
        assert_eq!(snapshot.services["orders-master"], record());
    }

    #[tokio::test]
    async fn watch_encodes_the_node_name() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/internal/ui/node/edge%2Frds%20nodes%3F"))
            .and(query_param("index", "0"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Consul-Index", "4")
                    .set_body_json(serde_json::json!({"Services": [], "Checks": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = backend(&server, false)
            .watch_node("edge/rds nodes?", 0, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(snapshot.index, 4);
        assert!(snapshot.services.is_empty());
    }

    #[tokio::test]
    async fn watch_of_missing_node_is_empty() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/internal/ui/node/rds"))
            .respond_with(ResponseTemplate::new(404).insert_header("X-Consul-Index", "3"))
            .mount(&server)
            .await;

        let snapshot = backend(&server, false)
            .watch_node("rds", 1, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(snapshot.index, 3);
        assert!(snapshot.services.is_empty());
    }

    #[tokio::test]
    async fn watch_without_index_header_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/internal/ui/node/rds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = backend(&server, false)
            .watch_node("rds", 1, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }

    #[tokio::test]
    async fn leader_probe() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/status/leader"))
            .respond_with(ResponseTemplate::new(200).set_body_json("10.0.0.9:8300"))
            .mount(&server)
            .await;

        let leader = backend(&server, false).check_leader().await.unwrap();
        assert_eq!(leader, "10.0.0.9:8300");
    }

    #[tokio::test]
    async fn leader_probe_rejects_bad_token() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/status/leader"))
            .respond_with(ResponseTemplate::new(403).set_body_string("ACL not found"))
            .mount(&server)
            .await;

        let err = backend(&server, false).check_leader().await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }
}
