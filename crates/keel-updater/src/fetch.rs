//! Conditional manifest fetching.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reqwest::header::{CACHE_CONTROL, ETAG};
use tracing::{debug, info};

use crate::cache::CacheState;
use crate::error::UpdateError;
use crate::transport::{get_following_redirect, Request, Response, Transport, ACCEPT_JSON};

/// Result of a conditional manifest fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// 200: a new manifest was written; carries the refreshed cache record
    Fetched(CacheState),
    /// 304: the cached manifest is still current; carries the refreshed cache record
    NotModified(CacheState),
}

impl FetchOutcome {
    pub fn cache_state(&self) -> &CacheState {
        match self {
            Self::Fetched(state) | Self::NotModified(state) => state,
        }
    }
}

/// Fetches the manifest and its detached signature.
pub struct ManifestFetcher {
    transport: Arc<dyn Transport>,
}

impl ManifestFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Conditionally fetch `url` into `dest`.
    ///
    /// `previous.validator` is sent as `If-None-Match` when non-empty. On
    /// 200 the body replaces `dest`; on 304 `dest` is left alone. In both
    /// cases the returned record carries the response's ETag (falling back
    /// to the previous one on 304) and an expiry of now + `max-age`.
    pub async fn fetch_manifest(
        &self,
        url: &str,
        dest: &Path,
        previous: &CacheState,
    ) -> Result<FetchOutcome, UpdateError> {
        let request = Request::get(url, ACCEPT_JSON).with_validator(&previous.validator);
        let response = get_following_redirect(self.transport.as_ref(), &request).await?;
        let now = Utc::now();

        match response.status {
            200 => {
                let state = cache_state_from(&response, "", now);
                persist(response, dest).await?;
                info!(url, validator = %state.validator, "Fetched new manifest");
                Ok(FetchOutcome::Fetched(state))
            }
            304 => {
                let state = cache_state_from(&response, &previous.validator, now);
                debug!(url, "Manifest not modified");
                Ok(FetchOutcome::NotModified(state))
            }
            status => Err(UpdateError::UnexpectedStatus {
                status,
                url: url.to_string(),
            }),
        }
    }

    /// Unconditionally fetch `url` into `dest` (used for the signature).
    pub async fn fetch_file(&self, url: &str, dest: &Path) -> Result<(), UpdateError> {
        let request = Request::get(url, ACCEPT_JSON);
        let response = get_following_redirect(self.transport.as_ref(), &request).await?;
        if response.status != 200 {
            return Err(UpdateError::UnexpectedStatus {
                status: response.status,
                url: url.to_string(),
            });
        }
        persist(response, dest).await?;
        debug!(url, dest = %dest.display(), "Fetched file");
        Ok(())
    }
}

async fn persist(response: Response, dest: &Path) -> Result<(), UpdateError> {
    if let Err(e) = response.write_to(dest).await {
        let _ = tokio::fs::remove_file(dest).await;
        return Err(e);
    }
    Ok(())
}

fn cache_state_from(response: &Response, fallback_validator: &str, now: DateTime<Utc>) -> CacheState {
    let validator = response
        .header(ETAG.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| fallback_validator.to_string());
    let max_age = response
        .header(CACHE_CONTROL.as_str())
        .and_then(parse_max_age)
        .unwrap_or(0);
    CacheState::new(validator, expiry_after(now, max_age))
}

fn expiry_after(now: DateTime<Utc>, max_age_secs: u64) -> DateTime<Utc> {
    let secs = i64::try_from(max_age_secs).unwrap_or(i64::MAX);
    Duration::try_seconds(secs)
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Extract the `max-age` directive (seconds) from a `Cache-Control` value.
pub fn parse_max_age(header: &str) -> Option<u64> {
    header.split(',').find_map(|directive| {
        let (name, value) = directive.trim().split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("max-age") {
            return None;
        }
        value.trim().trim_matches('"').parse().ok()
    })
}
