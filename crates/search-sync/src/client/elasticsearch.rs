//! Elasticsearch transport.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use elasticsearch::auth::Credentials;
use elasticsearch::cert::CertificateValidation;
use elasticsearch::http::request::JsonBody;
use elasticsearch::http::response::Response;
use elasticsearch::http::Url;
use elasticsearch::http::transport::{SingleNodeConnectionPool, Transport, TransportBuilder};
use elasticsearch::indices::{IndicesCreateParts, IndicesExistsParts, IndicesRefreshParts};
use elasticsearch::{BulkParts, DeleteParts, Elasticsearch, IndexParts, SearchParts};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{BulkSummary, IndexClient, SearchRequest, SearchResponse};
use crate::error::{TransportError, TransportResult};
use crate::registry::IndexDescriptor;
use crate::types::{Document, RecordId};

const ENGINE: &str = "elasticsearch";

/// Credentials sent with every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum ElasticsearchAuth {
    /// HTTP basic auth.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// `Authorization: Bearer` token.
    Bearer {
        /// Token.
        token: String,
    },
}

impl ElasticsearchAuth {
    fn credentials(&self) -> Credentials {
        match self {
            Self::Basic { username, password } => {
                Credentials::Basic(username.clone(), password.clone())
            }
            Self::Bearer { token } => Credentials::Bearer(token.clone()),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Where and how to reach the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    /// Node URLs. Requests go to the first one.
    pub nodes: Vec<String>,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Credentials, if the cluster requires them.
    #[serde(default)]
    pub auth: Option<ElasticsearchAuth>,

    /// Skip TLS certificate checks (self-signed local clusters).
    #[serde(default)]
    pub disable_certificate_validation: bool,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self::new("http://localhost:9200")
    }
}

impl ElasticsearchConfig {
    /// Targets a single node.
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            nodes: vec![node.into()],
            request_timeout_ms: default_request_timeout_ms(),
            auth: None,
            disable_certificate_validation: false,
        }
    }

    /// Sets the credentials.
    pub fn with_auth(mut self, auth: ElasticsearchAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets the per-request timeout.
    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    fn node_url(&self) -> TransportResult<Url> {
        let node = self.nodes.first().ok_or_else(|| TransportError::Configuration {
            message: "no Elasticsearch node configured".to_string(),
        })?;
        node.parse().map_err(|e| TransportError::Configuration {
            message: format!("invalid node URL '{}': {}", node, e),
        })
    }

    fn transport(&self) -> TransportResult<Transport> {
        let mut builder = TransportBuilder::new(SingleNodeConnectionPool::new(self.node_url()?))
            .timeout(Duration::from_millis(self.request_timeout_ms));
        if self.disable_certificate_validation {
            builder = builder.cert_validation(CertificateValidation::None);
        }
        if let Some(auth) = &self.auth {
            builder = builder.auth(auth.credentials());
        }

        builder.build().map_err(|e| TransportError::Configuration {
            message: format!("cannot build transport: {}", e),
        })
    }
}

/// [`IndexClient`] over the Elasticsearch REST API.
pub struct ElasticsearchIndexClient {
    client: Elasticsearch,
    config: ElasticsearchConfig,
}

impl Debug for ElasticsearchIndexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchIndexClient")
            .field("nodes", &self.config.nodes)
            .finish_non_exhaustive()
    }
}

impl ElasticsearchIndexClient {
    /// Builds the transport. No request is sent until the first operation.
    pub fn new(config: ElasticsearchConfig) -> TransportResult<Self> {
        let client = Elasticsearch::new(config.transport()?);
        Ok(Self { client, config })
    }

    /// The transport configuration.
    pub fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }
}

fn unavailable(context: &str, error: elasticsearch::Error) -> TransportError {
    TransportError::Unavailable {
        engine: ENGINE.to_string(),
        message: format!("{}: {}", context, error),
    }
}

async fn rejected(index: &str, response: Response) -> TransportError {
    let status = response.status_code().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransportError::Rejected {
        index: index.to_string(),
        status,
        body,
    }
}

async fn json_body(index: &str, response: Response) -> TransportResult<Value> {
    response
        .json::<Value>()
        .await
        .map_err(|e| TransportError::InvalidResponse {
            index: index.to_string(),
            message: e.to_string(),
        })
}

/// Builds the newline-delimited `_bulk` body: an action line then the source.
fn bulk_body(documents: &[Document]) -> Vec<JsonBody<Value>> {
    let mut body = Vec::with_capacity(documents.len() * 2);
    for document in documents {
        body.push(JsonBody::new(json!({"index": {"_id": document.id.to_string()}})));
        body.push(JsonBody::new(document.body.clone()));
    }
    body
}

#[async_trait]
impl IndexClient for ElasticsearchIndexClient {
    fn engine_name(&self) -> &'static str {
        ENGINE
    }

    async fn index_document(&self, index: &str, id: RecordId, body: &Value) -> TransportResult<()> {
        let doc_id = id.to_string();
        let response = self
            .client
            .index(IndexParts::IndexId(index, &doc_id))
            .body(body)
            .send()
            .await
            .map_err(|e| unavailable("Failed to index document", e))?;

        if !response.status_code().is_success() {
            return Err(rejected(index, response).await);
        }
        Ok(())
    }

    async fn delete_document(&self, index: &str, id: RecordId) -> TransportResult<()> {
        let doc_id = id.to_string();
        let response = self
            .client
            .delete(DeleteParts::IndexId(index, &doc_id))
            .send()
            .await
            .map_err(|e| unavailable("Failed to delete document", e))?;

        let status = response.status_code();
        // Already absent: the desired end state.
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        Err(rejected(index, response).await)
    }

    async fn bulk_write(&self, index: &str, documents: &[Document]) -> TransportResult<BulkSummary> {
        if documents.is_empty() {
            return Ok(BulkSummary::default());
        }

        let response = self
            .client
            .bulk(BulkParts::Index(index))
            .body(bulk_body(documents))
            .send()
            .await
            .map_err(|e| unavailable("Failed to send bulk request", e))?;

        if !response.status_code().is_success() {
            return Err(rejected(index, response).await);
        }

        let body = json_body(index, response).await?;
        BulkSummary::from_es_body(index, documents.len(), &body)
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> TransportResult<SearchResponse> {
        let response = self
            .client
            .search(SearchParts::Index(&[index]))
            .body(request.to_es_body())
            .send()
            .await
            .map_err(|e| unavailable("Failed to search", e))?;

        if !response.status_code().is_success() {
            let status = response.status_code().as_u16();
            let body = response.text().await.unwrap_or_default();
            if body.contains("index_not_found_exception") {
                return Ok(SearchResponse::default());
            }
            return Err(TransportError::Rejected {
                index: index.to_string(),
                status,
                body,
            });
        }

        let body = json_body(index, response).await?;
        SearchResponse::from_es_body(index, &body)
    }

    async fn refresh_index(&self, index: &str) -> TransportResult<()> {
        let response = self
            .client
            .indices()
            .refresh(IndicesRefreshParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| unavailable("Failed to refresh index", e))?;

        let status = response.status_code();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        Err(rejected(index, response).await)
    }

    async fn index_exists(&self, index: &str) -> TransportResult<bool> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| unavailable("Failed to check index existence", e))?;

        Ok(response.status_code().is_success())
    }

    async fn create_index(
        &self,
        index: &str,
        descriptor: Option<&IndexDescriptor>,
    ) -> TransportResult<()> {
        let body = descriptor
            .map(IndexDescriptor::create_index_body)
            .unwrap_or_else(|| json!({}));

        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(body)
            .send()
            .await
            .map_err(|e| unavailable("Failed to create index", e))?;

        if !response.status_code().is_success() {
            return Err(rejected(index, response).await);
        }

        tracing::debug!("Created Elasticsearch index '{}'", index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ElasticsearchConfig::default();
        assert_eq!(config.nodes, vec!["http://localhost:9200"]);
        assert_eq!(config.request_timeout_ms, 30_000);
        assert!(config.auth.is_none());
    }

    #[test]
    fn test_config_from_json_with_tagged_auth() {
        let config: ElasticsearchConfig = serde_json::from_value(json!({
            "nodes": ["https://search.internal:9200"],
            "auth": {"scheme": "bearer", "token": "abc"}
        }))
        .unwrap();

        assert_eq!(
            config,
            ElasticsearchConfig::new("https://search.internal:9200")
                .with_auth(ElasticsearchAuth::Bearer { token: "abc".to_string() })
        );
    }

    #[test]
    fn test_empty_nodes_is_configuration_error() {
        let config = ElasticsearchConfig {
            nodes: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(
            ElasticsearchIndexClient::new(config),
            Err(TransportError::Configuration { .. })
        ));
    }

    #[test]
    fn test_invalid_url_is_configuration_error() {
        let config = ElasticsearchConfig {
            nodes: vec!["not a url".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            ElasticsearchIndexClient::new(config),
            Err(TransportError::Configuration { .. })
        ));
    }

    #[test]
    fn test_client_builds_without_connecting() {
        let client = ElasticsearchIndexClient::new(ElasticsearchConfig::default()).unwrap();
        assert_eq!(client.engine_name(), "elasticsearch");
    }

    #[test]
    fn test_bulk_body_alternates_action_and_source() {
        let docs = vec![
            Document::new(1, json!({"id": 1})),
            Document::new(2, json!({"id": 2})),
        ];
        assert_eq!(bulk_body(&docs).len(), 4);
    }
}
