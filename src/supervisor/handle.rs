//! Caller-facing supervisor handle

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::events::{Event, EventBus};
use crate::node_api::{HttpNodeApi, NodeApi};
use crate::process::{Launcher, TokioLauncher};

use super::health::HealthPoller;
use super::node::NodeStart;
use super::runner::{Command, SupervisorLoop};
use super::status::SupervisorStatus;

const COMMAND_CAPACITY: usize = 32;

/// Handle to a running supervisor
///
/// Cheap to clone. Commands are queued to the supervisor task and answered
/// in order. Once [`shutdown`](Self::shutdown) has run, every command
/// returns [`SupervisorError::Closed`].
///
/// # Example
/// ```no_run
/// use livepeer_supervisor::{Event, Supervisor, SupervisorConfig};
///
/// # async fn example() -> livepeer_supervisor::Result<()> {
/// let supervisor = Supervisor::start(SupervisorConfig::default())?;
/// let mut events = supervisor.subscribe();
///
/// supervisor.start_node().await?;
/// supervisor.start_broadcaster(0).await?;
/// supervisor.get_stream_id().await?;
///
/// while let Ok(event) = events.recv().await {
///     if let Event::BroadcastReady { stream_id } = event {
///         println!("live: {}", stream_id);
///         break;
///     }
/// }
///
/// supervisor.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Supervisor<A = HttpNodeApi> {
    commands: mpsc::Sender<Command>,
    bus: EventBus,
    api: Arc<A>,
    token: CancellationToken,
}

impl<A> Clone for Supervisor<A> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            bus: self.bus.clone(),
            api: Arc::clone(&self.api),
            token: self.token.clone(),
        }
    }
}

impl Supervisor<HttpNodeApi> {
    /// Start supervising with the real HTTP client and `tokio::process`
    ///
    /// Must be called from within a tokio runtime. Health polling starts
    /// immediately; neither process is started.
    pub fn start(config: SupervisorConfig) -> Result<Self> {
        config.validate()?;
        let api = HttpNodeApi::new(&config)?;
        let launcher = TokioLauncher::new().kill_after(config.stop_grace_period);
        Ok(Self::with_parts(config, Arc::new(api), Arc::new(launcher)))
    }
}

impl<A: NodeApi> Supervisor<A> {
    /// Start supervising with a custom node API client and launcher
    pub fn with_parts<L: Launcher>(config: SupervisorConfig, api: Arc<A>, launcher: Arc<L>) -> Self {
        let config = Arc::new(config);
        let bus = EventBus::new(config.event_capacity);
        let token = CancellationToken::new();
        let (commands, commands_rx) = mpsc::channel(COMMAND_CAPACITY);

        HealthPoller::new(Arc::clone(&api), bus.clone(), config.poll_interval)
            .spawn(token.child_token());

        let event_loop = SupervisorLoop::new(
            config,
            Arc::clone(&api),
            launcher,
            bus.clone(),
            token.clone(),
            commands_rx,
        );
        tokio::spawn(event_loop.run());

        Self {
            commands,
            bus,
            api,
            token,
        }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Start the node, or adopt one that is already running
    pub async fn start_node(&self) -> Result<NodeStart> {
        self.request(Command::StartNode).await?
    }

    /// Terminate the node if this supervisor spawned it
    ///
    /// Returns whether a termination signal was sent.
    pub async fn stop_node(&self) -> Result<bool> {
        self.request(Command::StopNode).await
    }

    /// Wipe the node data directory and restart the node
    pub async fn reset_node(&self) -> Result<NodeStart> {
        self.request(Command::ResetNode).await?
    }

    /// Launch the broadcaster with the given profile
    ///
    /// Resolves once the process was spawned; returns its pid.
    pub async fn start_broadcaster(&self, profile: usize) -> Result<Option<u32>> {
        self.request(|reply| Command::StartBroadcaster { profile, reply })
            .await?
    }

    /// Stop the broadcaster without triggering the fallback policy
    pub async fn stop_broadcaster(&self) -> Result<bool> {
        self.request(Command::StopBroadcaster).await
    }

    /// Start polling for the stream id
    ///
    /// The id arrives as [`Event::BroadcastReady`]. Returns false if a poll
    /// was already running.
    pub async fn get_stream_id(&self) -> Result<bool> {
        self.request(Command::WatchStreamId).await
    }

    /// Fetch the HLS playlist for `stream_id`
    pub async fn get_video(&self, stream_id: &str) -> Result<Bytes> {
        self.api.playlist(stream_id).await.map_err(|e| {
            tracing::info!(stream_id = %stream_id, error = %e, "Playlist request failed");
            SupervisorError::from(e)
        })
    }

    /// Snapshot of both managers
    pub async fn status(&self) -> Result<SupervisorStatus> {
        self.request(Command::Status).await
    }

    /// Stop polling and signal both processes to stop
    ///
    /// Returns once both have exited, or after twice the stop grace period.
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.request(Command::Shutdown).await.is_err() {
            tracing::debug!("Supervisor already shut down");
        }
    }

    /// Whether shutdown has begun
    pub fn is_shut_down(&self) -> bool {
        self.token.is_cancelled()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SupervisorError::Closed)?;
        rx.await.map_err(|_| SupervisorError::Closed)
    }
}
