//! HTTP transport seam.
//!
//! Everything the updater downloads goes through [`Transport::get`]. The
//! production implementation wraps a `reqwest::Client` with automatic
//! redirects disabled; the single redirect hop the update protocol allows is
//! handled by [`get_following_redirect`] so it behaves identically for any
//! transport.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderMap, ACCEPT, IF_NONE_MATCH, LOCATION};
use reqwest::Url;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::NetworkConfig;
use crate::error::UpdateError;

/// `Accept` value for manifest and signature requests.
pub const ACCEPT_JSON: &str = "application/json";
/// `Accept` value for binary downloads.
pub const ACCEPT_BINARY: &str = "application/octet-stream";

/// A GET request as the updater issues it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub accept: &'static str,
    /// Validator sent as `If-None-Match`
    pub if_none_match: Option<String>,
}

impl Request {
    pub fn get(url: impl Into<String>, accept: &'static str) -> Self {
        Self {
            url: url.into(),
            accept,
            if_none_match: None,
        }
    }

    /// Attach a validator; empty validators are ignored.
    pub fn with_validator(mut self, validator: &str) -> Self {
        if !validator.is_empty() {
            self.if_none_match = Some(validator.to_string());
        }
        self
    }
}

/// Status, headers and a streamed body.
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, Result<Bytes, UpdateError>>,
}

impl Response {
    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn is_redirect(&self) -> bool {
        self.status == 301 || self.status == 302
    }

    /// Collect the whole body into memory. Suitable for small files only.
    pub async fn bytes(mut self) -> Result<Bytes, UpdateError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Stream the body into `dest`, replacing any previous content.
    ///
    /// Returns the number of bytes written. On error the partial file is
    /// left for the caller to clean up.
    pub async fn write_to(mut self, dest: &Path) -> Result<u64, UpdateError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = self.body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

/// Issues a single GET without following redirects.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: &Request) -> Result<Response, UpdateError>;
}

/// Send `request`, following at most one 301/302 hop.
///
/// The hop is re-issued to the `Location` target with the same `Accept`
/// header but without the conditional header, and its response is returned
/// as-is (a second redirect surfaces to the caller as an unexpected status).
pub async fn get_following_redirect(
    transport: &dyn Transport,
    request: &Request,
) -> Result<Response, UpdateError> {
    let response = transport.get(request).await?;
    if !response.is_redirect() {
        return Ok(response);
    }

    let location = response.header(LOCATION.as_str()).ok_or_else(|| {
        UpdateError::UnexpectedStatus {
            status: response.status,
            url: request.url.clone(),
        }
    })?;
    let target = resolve_location(&request.url, location)?;
    debug!(from = %request.url, to = %target, "Following redirect");

    transport.get(&Request::get(target, request.accept)).await
}

fn resolve_location(base: &str, location: &str) -> Result<String, UpdateError> {
    let base = Url::parse(base)
        .map_err(|e| UpdateError::ConfigError(format!("invalid URL {}: {}", base, e)))?;
    let target = base
        .join(location)
        .map_err(|e| UpdateError::NetworkError(format!("invalid redirect target {}: {}", location, e)))?;
    Ok(target.to_string())
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Apply the network configuration: timeouts, proxy and user agent.
    ///
    /// Only connecting and idle reads are bounded; there is no deadline on
    /// the whole request, so a slow but steady download runs to completion.
    /// Called once at startup; nothing else in the process touches proxy
    /// settings.
    pub fn from_network_config(config: &NetworkConfig) -> Result<Self, UpdateError> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(config.timeout_seconds))
            .read_timeout(Duration::from_secs(config.read_timeout_seconds))
            .user_agent(&config.user_agent);

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| UpdateError::ConfigError(format!("invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| UpdateError::ConfigError(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: &Request) -> Result<Response, UpdateError> {
        debug!(url = %request.url, conditional = request.if_none_match.is_some(), "GET");

        let mut builder = self.client.get(&request.url).header(ACCEPT, request.accept);
        if let Some(validator) = &request.if_none_match {
            builder = builder.header(IF_NONE_MATCH, validator.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| UpdateError::NetworkError(e.to_string())))
            .boxed();

        Ok(Response { status, headers, body })
    }
}
