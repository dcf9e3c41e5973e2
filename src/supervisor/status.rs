//! Status snapshots and per-process counters

use std::time::{Duration, Instant};

use crate::process::{ExitInfo, ProcessRefKind};

use super::broadcaster::BroadcasterPhase;

/// Lifetime counters for one managed process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessStats {
    /// Processes spawned
    pub spawns: u64,
    /// Exits nobody asked for
    pub unexpected_exits: u64,
    /// Exits following a stop request
    pub voluntary_exits: u64,
    /// Automatic restarts with a fallback profile
    pub fallbacks: u64,
    /// Most recent exit of the current or a previous process
    pub last_exit: Option<ExitInfo>,
    /// When the most recent process was spawned
    pub last_spawn_at: Option<Instant>,
}

impl ProcessStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_spawn(&mut self) {
        self.spawns += 1;
        self.last_spawn_at = Some(Instant::now());
    }

    pub(crate) fn record_exit(&mut self, info: ExitInfo, voluntary: bool) {
        if voluntary {
            self.voluntary_exits += 1;
        } else {
            self.unexpected_exits += 1;
        }
        self.last_exit = Some(info);
    }

    /// Time since the most recent spawn
    pub fn since_last_spawn(&self) -> Option<Duration> {
        self.last_spawn_at.map(|at| at.elapsed())
    }
}

/// Snapshot of the node manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub process: ProcessRefKind,
    pub pid: Option<u32>,
    pub stats: ProcessStats,
}

/// Snapshot of the broadcaster manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcasterStatus {
    pub phase: BroadcasterPhase,
    /// Profile of the current or most recent attempt
    pub profile_index: usize,
    pub pid: Option<u32>,
    pub stats: ProcessStats,
}

/// Snapshot of the whole supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub node: NodeStatus,
    pub broadcaster: BroadcasterStatus,
    /// Whether a stream id poll is currently running
    pub awaiting_stream_id: bool,
}
