//! Streaming node lifecycle
//!
//! The node is either absent, adopted from an instance that was already
//! running, or spawned and owned by us. Only an owned node is ever killed.
//! A node that dies is reported as fatal; there is no automatic restart.

use std::io::ErrorKind;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::events::{Event, EventBus, FatalCode};
use crate::node_api::NodeApi;
use crate::process::{
    ExitInfo, ExitWatch, LaunchSpec, Launcher, ManagedProcess, OutputStream, OwnedProcess,
    ProcessMessage, ProcessRef, ProcessSink,
};

use super::status::{NodeStatus, ProcessStats};

/// What `start` ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStart {
    /// A node was already serving the status port; adopted without owning it
    Adopted,
    /// We spawned a new node
    Spawned { pid: Option<u32> },
    /// Already started earlier; nothing to do
    AlreadyRunning,
}

/// Owns the node process reference
pub struct NodeManager<A, L> {
    config: Arc<SupervisorConfig>,
    api: Arc<A>,
    launcher: Arc<L>,
    bus: EventBus,
    process_tx: mpsc::UnboundedSender<ProcessMessage>,
    process: ProcessRef,
    generation: u64,
    /// Exit of the most recently released process, until reset consumes it
    releasing: Option<ExitWatch>,
    stats: ProcessStats,
}

impl<A: NodeApi, L: Launcher> NodeManager<A, L> {
    pub fn new(
        config: Arc<SupervisorConfig>,
        api: Arc<A>,
        launcher: Arc<L>,
        bus: EventBus,
        process_tx: mpsc::UnboundedSender<ProcessMessage>,
    ) -> Self {
        Self {
            config,
            api,
            launcher,
            bus,
            process_tx,
            process: ProcessRef::Absent,
            generation: 0,
            releasing: None,
            stats: ProcessStats::new(),
        }
    }

    /// Current process reference
    pub fn process(&self) -> &ProcessRef {
        &self.process
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            process: self.process.kind(),
            pid: self.process.pid(),
            stats: self.stats.clone(),
        }
    }

    /// Start the node unless one is already up
    pub async fn start(&mut self) -> Result<NodeStart> {
        let probe = self.api.status().await;

        if probe.is_ok() {
            if let ProcessRef::Owned(owned) = &self.process {
                // Reachable because it is ours
                tracing::info!(pid = ?owned.handle.pid(), "Node is already running (owned)");
                return Ok(NodeStart::AlreadyRunning);
            }
            tracing::info!(url = %self.config.node_url(), "Node is already running");
            self.process = ProcessRef::LocalExternal;
            return Ok(NodeStart::Adopted);
        }

        if !matches!(self.process, ProcessRef::Absent) {
            tracing::info!(state = ?self.process.kind(), "Node already started");
            return Ok(NodeStart::AlreadyRunning);
        }

        self.spawn()
    }

    fn spawn(&mut self) -> Result<NodeStart> {
        let spec = LaunchSpec::node(&self.config);
        let generation = self.generation + 1;
        let sink = ProcessSink::new(self.process_tx.clone(), ManagedProcess::Node, generation);

        let handle = self
            .launcher
            .spawn(&spec, sink)
            .map_err(|source| {
                tracing::error!(path = %spec.program.display(), error = %source, "Failed to spawn node");
                SupervisorError::Spawn {
                    process: ManagedProcess::Node,
                    path: spec.program.clone(),
                    source,
                }
            })?;

        let pid = handle.pid();
        self.generation = generation;
        self.process = ProcessRef::Owned(OwnedProcess { generation, handle });
        self.stats.record_spawn();

        tracing::info!(
            pid = ?pid,
            port = self.config.http_port,
            monitor_host = %self.config.monitor_host,
            "Node running"
        );

        Ok(NodeStart::Spawned { pid })
    }

    /// Terminate the node if we own it
    ///
    /// Returns whether a termination signal was sent. An adopted node is
    /// left alone.
    pub fn stop(&mut self) -> bool {
        tracing::info!("Stopping node");

        match std::mem::take(&mut self.process) {
            ProcessRef::Owned(owned) => {
                tracing::info!(pid = ?owned.handle.pid(), "Sending termination signal to node");
                self.releasing = Some(owned.handle.terminate());
                true
            }
            other => {
                self.process = other;
                false
            }
        }
    }

    /// Wipe the node data directory and restart the node
    pub async fn reset(&mut self) -> Result<NodeStart> {
        let dir = self.config.node_data_dir();
        tracing::info!(dir = %dir.display(), "Resetting node, deleting data directory");

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::info!(dir = %dir.display(), "Removed node data directory"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove node data directory")
            }
        }
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to recreate node data directory");
        }

        self.stop();
        self.wait_released().await;

        self.start().await
    }

    /// Wait for a just-terminated node to be gone, so the restart probe
    /// does not mistake it for an external instance
    pub async fn wait_released(&mut self) {
        let Some(exit) = self.releasing.take() else {
            return;
        };
        // One grace period for SIGTERM, one more for the forced kill to land
        let grace = self.config.stop_grace_period * 2;
        if tokio::time::timeout(grace, exit.wait()).await.is_err() {
            tracing::warn!(grace = ?grace, "Node did not exit within grace period");
        }
    }

    /// Log one output line
    pub fn on_output(&mut self, generation: u64, stream: OutputStream, line: &str) {
        tracing::info!(
            process = "node",
            generation = generation,
            stream = stream.as_str(),
            "{}",
            line
        );
    }

    /// Handle the exit of spawn `generation`
    pub fn on_exit(&mut self, generation: u64, info: ExitInfo) {
        let current = matches!(&self.process, ProcessRef::Owned(owned) if owned.generation == generation);

        if !current {
            // Released by stop earlier
            self.stats.record_exit(info, true);
            tracing::info!(generation = generation, status = %info, "Node process exited after stop");
            return;
        }

        self.process = ProcessRef::Absent;
        self.stats.record_exit(info, false);
        tracing::error!(
            code = ?info.code,
            signal = ?info.signal,
            "Node process exited with {}",
            info
        );
        self.bus.publish(Event::fatal(FatalCode::NodeDied));
    }
}
