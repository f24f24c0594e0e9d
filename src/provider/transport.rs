//! HTTP seam between the gateway and the network.
//!
//! The gateway only ever needs "POST this JSON, give me status + body".
//! Keeping that behind [`HttpTransport`] lets tests script vendor replies
//! (429, 429, 200…) without a socket, and keeps reqwest out of every
//! adapter.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

/// How the request authenticates.
pub enum Auth {
    None,
    /// `Authorization: Bearer <token>`.
    Bearer(Zeroizing<String>),
    /// `?<name>=<value>` appended to the URL.
    QueryKey {
        name: &'static str,
        value: Zeroizing<String>,
    },
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Auth::QueryKey { name, .. } => write!(f, "QueryKey({name}=<redacted>)"),
        }
    }
}

/// One JSON POST.
pub struct VendorRequest {
    pub url: String,
    pub auth: Auth,
    /// Extra headers whose values are secret (e.g. `apikey`).
    pub secret_headers: Vec<(&'static str, Zeroizing<String>)>,
    pub body: Value,
}

impl fmt::Debug for VendorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.secret_headers.iter().map(|(n, _)| *n).collect();
        f.debug_struct("VendorRequest")
            .field("url", &self.url)
            .field("auth", &self.auth)
            .field("secret_headers", &header_names)
            .finish_non_exhaustive()
    }
}

impl VendorRequest {
    pub fn new(url: impl Into<String>, auth: Auth, body: Value) -> Self {
        Self {
            url: url.into(),
            auth,
            secret_headers: Vec::new(),
            body,
        }
    }

    pub fn with_secret_header(mut self, name: &'static str, value: Zeroizing<String>) -> Self {
        self.secret_headers.push((name, value));
        self
    }
}

/// Status and body of a completed exchange, whatever the status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// The request never produced a status (DNS, TLS, connection reset, body read).
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_json(&self, request: &VendorRequest) -> Result<HttpReply, TransportError>;
}

/// Production transport over a shared `reqwest::Client`.
///
/// No timeout is set beyond reqwest's own defaults.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(&self, request: &VendorRequest) -> Result<HttpReply, TransportError> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        builder = match &request.auth {
            Auth::None => builder,
            Auth::Bearer(token) => builder.bearer_auth(token.as_str()),
            Auth::QueryKey { name, value } => builder.query(&[(*name, value.as_str())]),
        };
        for (name, value) in &request.secret_headers {
            builder = builder.header(*name, value.as_str());
        }

        // reqwest errors can embed the full URL; strip it so query keys never leak.
        let response = builder
            .send()
            .await
            .map_err(|e| TransportError(e.without_url().to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(e.without_url().to_string()))?;

        Ok(HttpReply { status, body })
    }
}
