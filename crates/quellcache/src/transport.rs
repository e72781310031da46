//! Transport: how queries reach the remote endpoint

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A graph response as returned to the caller
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphResponse {
    /// Response data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    /// Server-reported errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<Value>>,
}

impl GraphResponse {
    /// Response carrying only data
    pub fn from_data(data: Map<String, Value>) -> Self {
        Self {
            data: Some(data),
            errors: None,
        }
    }

    /// Check if the server reported any error
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }
}

#[derive(Debug, Serialize)]
struct GraphRequest<'a> {
    query: &'a str,
}

/// Transport failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP exchange failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("Endpoint returned HTTP {status}: {body}")]
    Status {
        /// Status code
        status: u16,
        /// Response body, as text
        body: String,
    },

    /// The server answered a remainder query with errors
    #[error("GraphQL error: {messages}")]
    Server {
        /// Error messages joined with `; `
        messages: String,
        /// Errors as reported
        errors: Vec<Value>,
    },

    /// Any other failure, mostly from custom transports
    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Wrap server-reported errors
    pub fn server(errors: Vec<Value>) -> Self {
        let messages = errors
            .iter()
            .map(|e| match e.get("message").and_then(Value::as_str) {
                Some(message) => message.to_string(),
                None => e.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        TransportError::Server { messages, errors }
    }
}

/// Sends query text to an endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `query` to `endpoint` with `headers`
    async fn execute(
        &self,
        endpoint: &str,
        query: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<GraphResponse, TransportError>;
}

/// JSON-over-HTTP transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Transport with a default client
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Transport over an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        endpoint: &str,
        query: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<GraphResponse, TransportError> {
        trace!("POST {}: {}", endpoint, query);

        let mut request = self.client.post(endpoint);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .json(&GraphRequest { query })
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
