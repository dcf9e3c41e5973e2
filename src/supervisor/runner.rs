//! The supervisor event loop
//!
//! One task owns both managers. Caller commands and process messages are
//! handled one at a time, so every state transition happens on this task
//! and needs no locking. Process messages are drained before commands so a
//! command always sees exits that were already reported.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::node_api::NodeApi;
use crate::process::{Launcher, ManagedProcess, ProcessEvent, ProcessMessage};

use super::broadcaster::BroadcasterManager;
use super::node::{NodeManager, NodeStart};
use super::status::SupervisorStatus;
use super::stream_ready::StreamReadyNotifier;

/// Request from a [`Supervisor`](super::Supervisor) handle
pub(crate) enum Command {
    StartNode(oneshot::Sender<Result<NodeStart>>),
    StopNode(oneshot::Sender<bool>),
    ResetNode(oneshot::Sender<Result<NodeStart>>),
    StartBroadcaster {
        profile: usize,
        reply: oneshot::Sender<Result<Option<u32>>>,
    },
    StopBroadcaster(oneshot::Sender<bool>),
    WatchStreamId(oneshot::Sender<bool>),
    Status(oneshot::Sender<SupervisorStatus>),
    Shutdown(oneshot::Sender<()>),
}

pub(crate) struct SupervisorLoop<A, L> {
    config: Arc<SupervisorConfig>,
    api: Arc<A>,
    bus: EventBus,
    token: CancellationToken,
    node: NodeManager<A, L>,
    broadcaster: BroadcasterManager<L>,
    stream_ready: Option<JoinHandle<Option<String>>>,
    commands: mpsc::Receiver<Command>,
    processes: mpsc::UnboundedReceiver<ProcessMessage>,
}

impl<A: NodeApi, L: Launcher> SupervisorLoop<A, L> {
    pub(crate) fn new(
        config: Arc<SupervisorConfig>,
        api: Arc<A>,
        launcher: Arc<L>,
        bus: EventBus,
        token: CancellationToken,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (process_tx, processes) = mpsc::unbounded_channel();

        Self {
            node: NodeManager::new(
                Arc::clone(&config),
                Arc::clone(&api),
                Arc::clone(&launcher),
                bus.clone(),
                process_tx.clone(),
            ),
            broadcaster: BroadcasterManager::new(
                Arc::clone(&config),
                launcher,
                bus.clone(),
                process_tx,
            ),
            config,
            api,
            bus,
            token,
            stream_ready: None,
            commands,
            processes,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::info!(node = %self.config.node_url(), "Supervisor started");

        loop {
            tokio::select! {
                biased;
                Some(msg) = self.processes.recv() => self.on_process(msg),
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        // Every handle is gone
                        self.shutdown().await;
                        break;
                    };
                    if !self.on_command(cmd).await {
                        break;
                    }
                }
            }
        }
    }

    /// Returns false once the loop should exit
    async fn on_command(&mut self, cmd: Command) -> bool {
        // Replies are dropped silently when the caller stopped waiting
        match cmd {
            Command::StartNode(reply) => {
                let _ = reply.send(self.node.start().await);
            }
            Command::StopNode(reply) => {
                let _ = reply.send(self.node.stop());
            }
            Command::ResetNode(reply) => {
                let _ = reply.send(self.node.reset().await);
            }
            Command::StartBroadcaster { profile, reply } => {
                let _ = reply.send(self.broadcaster.start(profile));
            }
            Command::StopBroadcaster(reply) => {
                let _ = reply.send(self.broadcaster.stop());
            }
            Command::WatchStreamId(reply) => {
                let _ = reply.send(self.watch_stream_id());
            }
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown(reply) => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn on_process(&mut self, msg: ProcessMessage) {
        let ProcessMessage {
            process,
            generation,
            event,
        } = msg;

        match (process, event) {
            (ManagedProcess::Node, ProcessEvent::Output { stream, line }) => {
                self.node.on_output(generation, stream, &line)
            }
            (ManagedProcess::Node, ProcessEvent::Exited(info)) => {
                self.node.on_exit(generation, info)
            }
            (ManagedProcess::Broadcaster, ProcessEvent::Output { stream, line }) => {
                self.broadcaster.on_output(generation, stream, &line)
            }
            (ManagedProcess::Broadcaster, ProcessEvent::Exited(info)) => {
                self.broadcaster.on_exit(generation, info)
            }
        }
    }

    /// Start polling for the stream id unless a poll is already running
    fn watch_stream_id(&mut self) -> bool {
        if self.awaiting_stream_id() {
            tracing::debug!("Already waiting for a stream id");
            return false;
        }

        let notifier = StreamReadyNotifier::new(
            Arc::clone(&self.api),
            self.bus.clone(),
            self.config.stream_id_interval,
            self.config.stream_id_max_attempts,
        );
        self.stream_ready = Some(tokio::spawn(notifier.run(self.token.child_token())));
        true
    }

    fn awaiting_stream_id(&self) -> bool {
        self.stream_ready
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            node: self.node.status(),
            broadcaster: self.broadcaster.status(),
            awaiting_stream_id: self.awaiting_stream_id(),
        }
    }

    /// Stop both processes and wait for them to exit
    async fn shutdown(&mut self) {
        tracing::info!("Shutting down supervisor");
        self.token.cancel();
        self.broadcaster.stop();
        self.node.stop();
        tokio::join!(self.broadcaster.wait_released(), self.node.wait_released());
    }
}
