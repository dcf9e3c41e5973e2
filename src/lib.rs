//! # livepeer-supervisor
//!
//! Supervises a Livepeer streaming node and an ffmpeg broadcaster:
//!
//! - starts the node, or adopts one that is already serving its status port
//! - polls node health and reports peer counts
//! - launches the broadcaster and falls back through encoding profiles when
//!   it crashes
//! - waits for the node to assign a stream id
//! - reports everything through a single event stream
//!
//! ```no_run
//! use livepeer_supervisor::{EncodingProfile, Event, Supervisor, SupervisorConfig};
//!
//! # async fn example() -> livepeer_supervisor::Result<()> {
//! let config = SupervisorConfig::default()
//!     .home_dir("/home/alice")
//!     .profiles(vec![EncodingProfile::new(30, 60), EncodingProfile::new(15, 30)]);
//!
//! let supervisor = Supervisor::start(config)?;
//! let mut events = supervisor.subscribe();
//! supervisor.start_node().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         Event::PeerCount { count } => println!("{} peers", count),
//!         Event::Fatal { code } => {
//!             eprintln!("fatal: {}", code);
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod node_api;
pub mod process;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{CaptureSource, EncodingProfile, ExecutablePaths, SupervisorConfig};
pub use error::{ProbeError, Result, SupervisorError};
pub use events::{Event, EventBus, FatalCode, LoadingOp};
pub use node_api::{HttpNodeApi, NodeApi};
pub use supervisor::{NodeStart, Supervisor, SupervisorStatus};
