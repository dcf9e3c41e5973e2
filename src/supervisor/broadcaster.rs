//! Broadcaster lifecycle and profile fallback
//!
//! ```text
//!            start(i)                first output
//!   Idle ──────────────► Starting ─────────────────► Running
//!    ▲                      │  │                        │
//!    │        stop()        │  └──── exit: crash ───────┤
//!    │   ┌──────────────────┘                           │ stop()
//!    │   ▼                                              ▼
//!    └─ Stopping ◄──────────────────────────────────────┘
//!      (exit: voluntary)
//! ```
//!
//! A crash in `Starting` or `Running` restarts with the next profile, or
//! publishes `fatal{3}` when the last profile has failed. The phase is set
//! to `Stopping` before the termination signal is sent, so the exit of a stopped process
//! can never be taken for a crash. Every spawn gets a new generation and
//! exits from older generations are ignored.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::events::{Event, EventBus, FatalCode};
use crate::process::{
    ExitInfo, ExitWatch, LaunchSpec, Launcher, ManagedProcess, OutputStream, OwnedProcess, ProcessMessage,
    ProcessSink,
};

use super::status::{BroadcasterStatus, ProcessStats};

/// Broadcaster lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcasterPhase {
    /// No process
    Idle,
    /// Spawned, no output seen yet
    Starting,
    /// Producing output
    Running,
    /// Termination requested; waiting for the exit
    Stopping,
}

/// Owns the broadcaster process and the fallback policy
pub struct BroadcasterManager<L> {
    config: Arc<SupervisorConfig>,
    launcher: Arc<L>,
    bus: EventBus,
    process_tx: mpsc::UnboundedSender<ProcessMessage>,
    process: Option<OwnedProcess>,
    phase: BroadcasterPhase,
    profile_index: usize,
    generation: u64,
    command_line: String,
    /// Exit of a stopped process, until shutdown waits for it
    releasing: Option<ExitWatch>,
    stats: ProcessStats,
}

impl<L: Launcher> BroadcasterManager<L> {
    pub fn new(
        config: Arc<SupervisorConfig>,
        launcher: Arc<L>,
        bus: EventBus,
        process_tx: mpsc::UnboundedSender<ProcessMessage>,
    ) -> Self {
        Self {
            config,
            launcher,
            bus,
            process_tx,
            process: None,
            phase: BroadcasterPhase::Idle,
            profile_index: 0,
            generation: 0,
            command_line: String::new(),
            releasing: None,
            stats: ProcessStats::new(),
        }
    }

    pub fn phase(&self) -> BroadcasterPhase {
        self.phase
    }

    pub fn profile_index(&self) -> usize {
        self.profile_index
    }

    pub fn status(&self) -> BroadcasterStatus {
        BroadcasterStatus {
            phase: self.phase,
            profile_index: self.profile_index,
            pid: self.process.as_ref().and_then(|p| p.handle.pid()),
            stats: self.stats.clone(),
        }
    }

    /// Launch the broadcaster with profile `profile_index`
    ///
    /// Returns as soon as the OS accepted the process; readiness is
    /// observed through the node, not here. A process from an earlier
    /// attempt is terminated first.
    pub fn start(&mut self, profile_index: usize) -> Result<Option<u32>> {
        let profiles = &self.config.profiles;
        let profile = *profiles
            .get(profile_index)
            .ok_or(SupervisorError::ProfileOutOfRange {
                index: profile_index,
                len: profiles.len(),
            })?;

        tracing::info!(
            profile = profile_index,
            frame_rate = profile.frame_rate,
            keyint = profile.keyframe_interval,
            "Launching broadcaster with config: {}",
            profile_index
        );

        if let Some(previous) = self.process.take() {
            tracing::info!(pid = ?previous.handle.pid(), "Replacing running broadcaster");
            previous.handle.terminate();
        }

        let spec = LaunchSpec::broadcaster(&self.config, &profile);
        self.generation += 1;
        self.profile_index = profile_index;
        self.command_line = spec.command_line();
        self.phase = BroadcasterPhase::Starting;

        let sink = ProcessSink::new(
            self.process_tx.clone(),
            ManagedProcess::Broadcaster,
            self.generation,
        );
        let handle = match self.launcher.spawn(&spec, sink) {
            Ok(handle) => handle,
            Err(source) => {
                self.phase = BroadcasterPhase::Idle;
                tracing::error!(
                    path = %spec.program.display(),
                    error = %source,
                    "Failed to spawn broadcaster"
                );
                return Err(SupervisorError::Spawn {
                    process: ManagedProcess::Broadcaster,
                    path: spec.program,
                    source,
                });
            }
        };

        let pid = handle.pid();
        self.process = Some(OwnedProcess {
            generation: self.generation,
            handle,
        });
        self.stats.record_spawn();

        Ok(pid)
    }

    /// Terminate the broadcaster on request
    ///
    /// Returns whether there was a process to terminate.
    pub fn stop(&mut self) -> bool {
        let Some(owned) = self.process.take() else {
            return false;
        };

        // Must precede the signal: the exit handler keys off this phase
        self.phase = BroadcasterPhase::Stopping;
        tracing::info!(pid = ?owned.handle.pid(), "Sending termination signal to broadcaster");
        self.releasing = Some(owned.handle.terminate());
        true
    }

    /// Wait for a stopped broadcaster to be gone
    pub async fn wait_released(&mut self) {
        let Some(exit) = self.releasing.take() else {
            return;
        };
        let limit = self.config.stop_grace_period * 2;
        if tokio::time::timeout(limit, exit.wait()).await.is_err() {
            tracing::warn!(limit = ?limit, "Broadcaster did not exit in time");
        }
    }

    /// Log one output line
    ///
    /// ffmpeg writes its normal progress to stderr, so neither stream is
    /// treated as a failure signal.
    pub fn on_output(&mut self, generation: u64, stream: OutputStream, line: &str) {
        tracing::info!(
            process = "broadcaster",
            generation = generation,
            stream = stream.as_str(),
            "{}",
            line
        );

        if generation == self.generation && self.phase == BroadcasterPhase::Starting {
            self.phase = BroadcasterPhase::Running;
            tracing::debug!(profile = self.profile_index, "Broadcaster running");
        }
    }

    /// Handle the exit of spawn `generation`
    pub fn on_exit(&mut self, generation: u64, info: ExitInfo) {
        if generation != self.generation {
            self.stats.record_exit(info, true);
            tracing::debug!(generation = generation, status = %info, "Superseded broadcaster exited");
            return;
        }

        match self.phase {
            BroadcasterPhase::Stopping => {
                self.phase = BroadcasterPhase::Idle;
                self.stats.record_exit(info, true);
                tracing::info!("Broadcaster terminated by the user");
            }
            BroadcasterPhase::Idle => {
                tracing::debug!(status = %info, "Broadcaster exit already handled");
            }
            BroadcasterPhase::Starting | BroadcasterPhase::Running => {
                self.process = None;
                self.stats.record_exit(info, false);
                tracing::warn!(
                    profile = self.profile_index,
                    code = ?info.code,
                    signal = ?info.signal,
                    command = %self.command_line,
                    "Broadcaster exited unexpectedly"
                );
                self.fall_back();
            }
        }
    }

    fn fall_back(&mut self) {
        let next = self.profile_index + 1;

        if next >= self.config.profiles.len() {
            self.phase = BroadcasterPhase::Idle;
            tracing::error!(
                profiles = self.config.profiles.len(),
                "Broadcaster failed on every profile"
            );
            self.bus.publish(Event::fatal(FatalCode::ProfilesExhausted));
            return;
        }

        self.stats.fallbacks += 1;
        if let Err(e) = self.start(next) {
            // Nothing left to try automatically
            tracing::error!(profile = next, error = %e, "Broadcaster fallback failed");
            self.bus.publish(Event::fatal(FatalCode::ProfilesExhausted));
        }
    }
}
