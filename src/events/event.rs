//! Event payloads

use serde::Serialize;

/// Key used for the node-readiness loading indicator
pub const LOADING_KEY: u32 = 1;

/// Loading indicator operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingOp {
    /// Something is still coming up
    Add,
    /// It is up now
    Remove,
}

/// Stable codes for unrecoverable failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalCode {
    /// The owned node process exited unexpectedly
    NodeDied,
    /// The broadcaster crashed on every configured profile
    ProfilesExhausted,
}

impl FatalCode {
    /// Numeric code the caller branches on
    pub fn code(self) -> u8 {
        match self {
            FatalCode::NodeDied => 2,
            FatalCode::ProfilesExhausted => 3,
        }
    }
}

impl Serialize for FatalCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl std::fmt::Display for FatalCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalCode::NodeDied => write!(f, "node died ({})", self.code()),
            FatalCode::ProfilesExhausted => {
                write!(f, "broadcaster profiles exhausted ({})", self.code())
            }
        }
    }
}

/// State change reported to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
    /// Loading indicator change
    Loading { op: LoadingOp, key: u32 },

    /// Node reports this many connected peers
    PeerCount { count: u64 },

    /// The node assigned a stream id to the broadcast
    #[serde(rename_all = "camelCase")]
    BroadcastReady { stream_id: String },

    /// Unrecoverable failure; the caller has to intervene
    Fatal { code: FatalCode },
}

impl Event {
    pub fn loading(op: LoadingOp) -> Self {
        Event::Loading {
            op,
            key: LOADING_KEY,
        }
    }

    pub fn fatal(code: FatalCode) -> Self {
        Event::Fatal { code }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Event::Loading { .. } => "loading",
            Event::PeerCount { .. } => "peerCount",
            Event::BroadcastReady { .. } => "broadcastReady",
            Event::Fatal { .. } => "fatal",
        }
    }
}
