//! Ticket broker client.
//!
//! Talks XML-RPC over HTTP to the allocation service. Every call is a single
//! POST to the configured endpoint; the broker owns all resource state.

use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::types::{Collected, ResourcePayload, TicketId};
use crate::xmlrpc::{self, Response};

/// Client for the ticket broker.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    /// Configuration for the client.
    config: Arc<BrokerConfig>,
    /// Parsed broker endpoint.
    endpoint: Url,
    /// HTTP client.
    http_client: reqwest::Client,
}

impl BrokerClient {
    /// Create a client for the default local broker.
    pub fn new() -> Result<Self> {
        Self::with_config(BrokerConfig::default())
    }

    /// Create a client with custom configuration.
    pub fn with_config(config: BrokerConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.url)?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(Error::config_error(format!(
                "unsupported broker scheme '{}'",
                endpoint.scheme()
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::connection_failed(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            endpoint,
            http_client,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Request a new ticket for the given tags.
    ///
    /// Returns as soon as the broker accepted the request; the resource is
    /// usually not assigned yet.
    pub async fn new_ticket(&self, tags: &[String]) -> Result<TicketId> {
        let id: TicketId = self.call("takeTicket", vec![json!(tags)]).await?;
        debug!(ticket = %id, ?tags, "Broker accepted ticket");
        Ok(id)
    }

    /// Read the current state of a ticket.
    pub async fn collect(&self, id: &TicketId) -> Result<Collected> {
        self.call("collectTicket", vec![json!(id)]).await
    }

    /// Poll a ticket until the broker assigns it a resource.
    pub async fn wait(&self, id: &TicketId) -> Result<ResourcePayload> {
        loop {
            if let Some(payload) = self.collect(id).await?.payload() {
                return Ok(payload);
            }
            debug!(
                ticket = %id,
                poll_ms = self.config.poll_interval.as_millis(),
                "Ticket not ready yet"
            );
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Tell the broker the ticket is no longer needed.
    pub async fn close(&self, id: &TicketId) -> Result<()> {
        let _: Value = self.call("closeTicket", vec![json!(id)]).await?;
        Ok(())
    }

    /// Perform a call, reconnecting while the broker is unreachable if configured.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let body = xmlrpc::encode_call(method, &params);
        let mut attempt = 0u32;

        let result = loop {
            attempt = attempt.saturating_add(1);

            match self.call_once(method, body.clone()).await {
                Ok(result) => break result,
                Err(e) if self.config.survive_server_restart && e.is_retryable() => {
                    warn!(
                        method,
                        attempt,
                        error = %e,
                        delay_ms = self.config.reconnect_delay.as_millis(),
                        "Broker unreachable, retrying"
                    );
                    tokio::time::sleep(self.config.reconnect_delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        serde_json::from_value(result).map_err(|e| {
            Error::invalid_response(format!("unexpected result for '{method}': {e}"))
        })
    }

    /// Execute a single request attempt.
    async fn call_once(&self, method: &str, body: String) -> Result<Value> {
        let response = self
            .http_client
            .post(self.endpoint.as_ref())
            .header(CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::connection_failed(format!(
                "broker returned server error {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::invalid_response(format!(
                "broker returned {status}: {body}"
            )));
        }

        let text = response.text().await.map_err(|e| self.classify(e))?;
        match xmlrpc::decode_response(&text)? {
            Response::Success(value) => Ok(value),
            Response::Fault { code, message } => Err(Error::rpc(method, code, message)),
        }
    }

    /// Map transport errors onto the broker error taxonomy.
    fn classify(&self, error: reqwest::Error) -> Error {
        if error.is_timeout() {
            let timeout_ms =
                u64::try_from(self.config.request_timeout.as_millis()).unwrap_or(u64::MAX);
            Error::timeout(timeout_ms)
        } else if error.is_connect() {
            Error::connection_failed(error.to_string())
        } else if error.is_decode() {
            Error::invalid_response(error.to_string())
        } else {
            Error::Http(error)
        }
    }
}
