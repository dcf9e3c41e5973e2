//! Process supervision
//!
//! The [`Supervisor`] handle is the caller's API. Behind it a single task
//! owns the [`NodeManager`] and the [`BroadcasterManager`]; a
//! [`HealthPoller`] and, on request, a [`StreamReadyNotifier`] run next to
//! it and only publish events.
//!
//! ```text
//!   Supervisor (handle) ── Command ──►┌──────────────────────┐
//!                                     │   SupervisorLoop     │
//!   Launcher ─ ProcessMessage ───────►│  NodeManager         │──► EventBus
//!                                     │  BroadcasterManager  │
//!                                     └──────────────────────┘
//!   HealthPoller ────────────────────────────────────────────────► EventBus
//!   StreamReadyNotifier ─────────────────────────────────────────► EventBus
//! ```

pub mod broadcaster;
pub mod handle;
pub mod health;
pub mod node;
mod runner;
pub mod status;
pub mod stream_ready;

pub use broadcaster::{BroadcasterManager, BroadcasterPhase};
pub use handle::Supervisor;
pub use health::HealthPoller;
pub use node::{NodeManager, NodeStart};
pub use status::{BroadcasterStatus, NodeStatus, ProcessStats, SupervisorStatus};
pub use stream_ready::StreamReadyNotifier;
