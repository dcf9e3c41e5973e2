//! reqwest-backed node API client

use std::error::Error as _;

use bytes::Bytes;
use serde::Deserialize;

use super::NodeApi;
use crate::config::SupervisorConfig;
use crate::error::{ProbeError, Result, SupervisorError};

#[derive(Debug, Deserialize)]
struct PeersCount {
    count: u64,
}

/// HTTP client for the node status API
#[derive(Debug, Clone)]
pub struct HttpNodeApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNodeApi {
    /// Create a client for the node described by `config`
    pub fn new(config: &SupervisorConfig) -> Result<Self> {
        // The node is always local; never route it through a system proxy
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SupervisorError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.node_url(),
        })
    }

    /// Base URL requests are made against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str) -> std::result::Result<reqwest::Response, ProbeError> {
        let url = format!("{}{}", self.base_url, path);
        self.client.get(&url).send().await.map_err(classify)
    }

    /// Like `get`, but a non-2xx status is an error
    async fn get_ok(&self, path: &str) -> std::result::Result<reqwest::Response, ProbeError> {
        self.get(path).await?.error_for_status().map_err(classify)
    }
}

impl NodeApi for HttpNodeApi {
    async fn status(&self) -> std::result::Result<(), ProbeError> {
        // Any HTTP response at all means something is serving the port
        self.get("/").await.map(|_| ())
    }

    async fn peers_count(&self) -> std::result::Result<u64, ProbeError> {
        let body: PeersCount = self.get_ok("/peersCount").await?.json().await.map_err(classify)?;
        Ok(body.count)
    }

    async fn stream_id(&self) -> std::result::Result<String, ProbeError> {
        let text = self.get_ok("/streamID").await?.text().await.map_err(classify)?;
        Ok(text.trim().to_string())
    }

    async fn playlist(&self, stream_id: &str) -> std::result::Result<Bytes, ProbeError> {
        let path = format!("/stream/{}.m3u8", stream_id);
        let body = self.get_ok(&path).await?.bytes().await.map_err(classify)?;
        if body.is_empty() {
            return Err(ProbeError::Other(format!("empty playlist for {}", stream_id)));
        }
        Ok(body)
    }
}

/// Split "nothing is listening" from every other failure
fn classify(err: reqwest::Error) -> ProbeError {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return ProbeError::Refused;
            }
        }
        source = cause.source();
    }
    ProbeError::Other(err.to_string())
}
