//! Health probe of the remote-write sink.
//!
//! The sink answers `GET /health` with a JSON body carrying a `status`
//! field. The probe URL is derived from the remote-write URL by keeping its
//! scheme, host and port.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SinkHealth {
    pub status: String,
}

impl SinkHealth {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy") || self.status.eq_ignore_ascii_case("ok")
    }
}

/// `<scheme>://<host>[:<port>]/health` for a remote-write URL.
///
/// # Errors
///
/// Returns [`Error::InvalidSpec`] if the URL does not parse or has no host.
pub fn health_url(remote_write_url: &str) -> Result<Url> {
    let mut url = Url::parse(remote_write_url)
        .map_err(|e| Error::InvalidSpec(format!("invalid remote-write URL {remote_write_url}: {e}")))?;
    if url.host_str().is_none() {
        return Err(Error::InvalidSpec(format!(
            "remote-write URL {remote_write_url} has no host"
        )));
    }
    url.set_path("/health");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Query the sink health endpoint.
///
/// # Errors
///
/// Connection failures and 5xx answers are [`Error::Transient`]; other
/// error statuses and malformed bodies are [`Error::Fatal`].
pub async fn probe(remote_write_url: &str) -> Result<SinkHealth> {
    let url = health_url(remote_write_url)?;
    debug!(url = %url, "Probing remote-write sink");

    let client = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .map_err(|e| Error::Fatal(format!("failed to build HTTP client: {e}")))?;

    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| Error::Transient(format!("sink {url} unreachable: {e}")))?;

    let status = response.status();
    if status.is_server_error() {
        return Err(Error::Transient(format!("sink {url} returned {status}")));
    }
    if !status.is_success() {
        return Err(Error::Fatal(format!("sink {url} returned {status}")));
    }

    response
        .json::<SinkHealth>()
        .await
        .map_err(|e| Error::Fatal(format!("sink {url} returned an unexpected body: {e}")))
}
