//! HTTP submission of telemetry and attributes to the ingestion endpoint.
//!
//! Each call to [`DeliveryClient::submit`] issues at most one POST to
//! `{scheme}://{server}/api/v1/{device_key}/{telemetry|attributes}` and maps
//! the result to a [`SubmissionOutcome`]. Retrying is the caller's business:
//! failed telemetry is cached by the publisher and replayed by the drainer.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::{Client, ClientBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

use crate::config::{Config, ConnectionConfig, ProxyConfig, Transport};

/// Which endpoint of a device a payload goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmissionKind {
    Telemetry,
    Attributes,
}

impl SubmissionKind {
    /// Last path segment of the endpoint URL.
    pub fn path_segment(self) -> &'static str {
        match self {
            SubmissionKind::Telemetry => "telemetry",
            SubmissionKind::Attributes => "attributes",
        }
    }
}

impl fmt::Display for SubmissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// Result of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// The endpoint answered 200.
    Delivered,
    /// Network error, timeout or non-200 answer. Worth retrying later.
    TransientFailure {
        /// HTTP status, when the server answered at all.
        status: Option<u16>,
        reason: String,
    },
    /// The client cannot submit at all with the current configuration.
    ConfigurationError(String),
}

impl SubmissionOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, SubmissionOutcome::Delivered)
    }

    pub fn is_configuration_error(&self) -> bool {
        matches!(self, SubmissionOutcome::ConfigurationError(_))
    }

    /// HTTP status for logging: 200 when delivered, the server's answer for a
    /// rejected request, `None` when no response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            SubmissionOutcome::Delivered => Some(200),
            SubmissionOutcome::TransientFailure { status, .. } => *status,
            SubmissionOutcome::ConfigurationError(_) => None,
        }
    }
}

impl fmt::Display for SubmissionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionOutcome::Delivered => write!(f, "delivered"),
            SubmissionOutcome::TransientFailure {
                status: Some(code),
                reason,
            } => write!(f, "failed with HTTP {code}: {reason}"),
            SubmissionOutcome::TransientFailure { status: None, reason } => {
                write!(f, "failed: {reason}")
            }
            SubmissionOutcome::ConfigurationError(reason) => {
                write!(f, "configuration error: {reason}")
            }
        }
    }
}

/// Anything that can submit a payload for a device.
///
/// Implementations must not retry internally and must never leave a call
/// pending: a timeout is a [`SubmissionOutcome::TransientFailure`].
pub trait DeliveryClient: Send + Sync {
    /// Submit one JSON `payload` to the `kind` endpoint of `device_key`.
    fn submit(&self, device_key: &str, kind: SubmissionKind, payload: &str) -> SubmissionOutcome;
}

/// Errors building the HTTP client from configuration.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid proxy URL '{url}': {source}")]
    Proxy {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid HTTP header '{name}': {reason}")]
    Header { name: String, reason: String },
    #[error("cannot build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Endpoint URL for a submission, or `None` if the transport is unsupported.
pub fn submission_url(
    transport: &Transport,
    server: &str,
    device_key: &str,
    kind: SubmissionKind,
) -> Option<String> {
    let scheme = transport.scheme()?;
    let server = server.trim().trim_end_matches('/');
    Some(format!("{scheme}://{server}/api/v1/{device_key}/{kind}"))
}

/// Client builder with the configured timeout and, when enabled, proxies.
///
/// Shared by the delivery client and the weather producers so every outbound
/// request honours the same proxy settings.
pub fn client_builder(
    connection: &ConnectionConfig,
    proxies: &ProxyConfig,
) -> Result<ClientBuilder, DeliveryError> {
    let mut builder = Client::builder().timeout(Duration::from_secs(connection.timeout_secs));
    if connection.proxy {
        if let Some(url) = &proxies.http {
            let proxy = reqwest::Proxy::http(url).map_err(|source| DeliveryError::Proxy {
                url: url.clone(),
                source,
            })?;
            builder = builder.proxy(proxy);
        }
        if let Some(url) = &proxies.https {
            let proxy = reqwest::Proxy::https(url).map_err(|source| DeliveryError::Proxy {
                url: url.clone(),
                source,
            })?;
            builder = builder.proxy(proxy);
        }
    }
    Ok(builder)
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, DeliveryError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| DeliveryError::Header {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| DeliveryError::Header {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Blocking HTTP implementation of [`DeliveryClient`].
pub struct HttpDelivery {
    client: Client,
    transport: Transport,
    server: String,
}

impl HttpDelivery {
    /// Build a client from the connection and proxy settings.
    pub fn new(connection: &ConnectionConfig, proxies: &ProxyConfig) -> Result<Self, DeliveryError> {
        let client = client_builder(connection, proxies)?
            .default_headers(header_map(&connection.headers)?)
            .build()
            .map_err(DeliveryError::Client)?;
        Ok(Self {
            client,
            transport: connection.method.clone(),
            server: connection.server.clone(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, DeliveryError> {
        Self::new(&config.connection, &config.proxies)
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Endpoint URL for `device_key` and `kind`.
    pub fn url(&self, device_key: &str, kind: SubmissionKind) -> Option<String> {
        submission_url(&self.transport, &self.server, device_key, kind)
    }
}

impl DeliveryClient for HttpDelivery {
    fn submit(&self, device_key: &str, kind: SubmissionKind, payload: &str) -> SubmissionOutcome {
        let Some(url) = self.url(device_key, kind) else {
            return SubmissionOutcome::ConfigurationError(format!(
                "unsupported transport method '{}'",
                self.transport
            ));
        };

        debug!("POST {url} ({} bytes)", payload.len());
        match self.client.post(&url).body(payload.to_string()).send() {
            Ok(response) if response.status() == StatusCode::OK => SubmissionOutcome::Delivered,
            Ok(response) => {
                let status = response.status();
                SubmissionOutcome::TransientFailure {
                    status: Some(status.as_u16()),
                    reason: format!("{kind} rejected: {status}"),
                }
            }
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("{kind} request timed out")
                } else if e.is_connect() {
                    format!("cannot connect to {}: {e}", self.server)
                } else {
                    format!("{kind} request failed: {e}")
                };
                SubmissionOutcome::TransientFailure {
                    status: None,
                    reason,
                }
            }
        }
    }
}
