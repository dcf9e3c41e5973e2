//! Supervisor event stream
//!
//! Every state change the caller can observe goes through the [`EventBus`].
//! It uses `tokio::sync::broadcast` for fan-out to any number of subscribers.
//!
//! ```text
//!   HealthPoller ────┐
//!   NodeManager ─────┤
//!   Broadcaster ─────┼──► EventBus ──► subscriber.recv()
//!   StreamReady ─────┘   (broadcast)   subscriber.recv()
//! ```
//!
//! Events are transient: a subscriber only sees events published after it
//! subscribed, in emission order. Nothing is stored when nobody listens.

pub mod bus;
pub mod event;

pub use bus::EventBus;
pub use event::{Event, FatalCode, LoadingOp, LOADING_KEY};
