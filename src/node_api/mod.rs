//! Node HTTP API
//!
//! The streaming node exposes a small HTTP status API. Only the endpoints
//! the supervisor needs are modelled here:
//!
//! | Endpoint              | Meaning                                   |
//! |-----------------------|-------------------------------------------|
//! | `GET /`               | any response means the node is up         |
//! | `GET /peersCount`     | `{"count": n}`                            |
//! | `GET /streamID`       | current stream id, empty until assigned   |
//! | `GET /stream/{id}.m3u8` | HLS playlist for a stream               |
//!
//! [`NodeApi`] is the seam the supervisor talks through; [`HttpNodeApi`] is
//! the real client.

pub mod http;

use std::future::Future;

use bytes::Bytes;

use crate::error::ProbeError;

pub use http::HttpNodeApi;

/// Client for the node status API
pub trait NodeApi: Send + Sync + 'static {
    /// Probe the status root
    fn status(&self) -> impl Future<Output = Result<(), ProbeError>> + Send;

    /// Number of connected peers
    fn peers_count(&self) -> impl Future<Output = Result<u64, ProbeError>> + Send;

    /// Stream id assigned to the local broadcast, empty if none yet
    fn stream_id(&self) -> impl Future<Output = Result<String, ProbeError>> + Send;

    /// HLS playlist for `stream_id`
    fn playlist(&self, stream_id: &str) -> impl Future<Output = Result<Bytes, ProbeError>> + Send;
}
