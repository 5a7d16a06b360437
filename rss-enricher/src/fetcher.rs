use crate::types::{EnricherError, FetchConfig, Result};
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// HTTP transport for feed documents.
///
/// Holds two clients built from the same [`FetchConfig`]: the default one
/// verifies TLS certificates, the other is only used for sources registered
/// with verification turned off.
pub struct Fetcher {
    client: Client,
    insecure_client: Client,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = build_client(&config, true)?;
        let insecure_client = build_client(&config, false)?;

        Ok(Self {
            client,
            insecure_client,
        })
    }

    /// GET the document at `url`. Any non-2xx status is an error.
    pub async fn fetch(&self, url: &str, verify_tls: bool) -> Result<Bytes> {
        debug!(url, verify_tls, "Fetching feed");

        let client = if verify_tls {
            &self.client
        } else {
            debug!(url, "TLS verification disabled for this source");
            &self.insecure_client
        };

        let response = client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(EnricherError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        debug!(url, bytes = body.len(), "Fetched feed");
        Ok(body)
    }
}

fn build_client(config: &FetchConfig, verify_tls: bool) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_seconds))
        .gzip(true)
        .deflate(true)
        .brotli(true)
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        .danger_accept_invalid_certs(!verify_tls)
        .build()?;
    Ok(client)
}
