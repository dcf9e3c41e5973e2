//! Managed OS processes
//!
//! A spawned process reports back through a [`ProcessSink`]: one message per
//! line of output and exactly one terminal [`ProcessEvent::Exited`]. Messages
//! are tagged with the process kind and the spawn generation so the
//! supervisor can tell the current attempt from a superseded one.
//!
//! ```text
//!   Launcher::spawn ──► ProcessHandle (kill / wait)
//!        │
//!        └─ stdout/stderr readers ─┐
//!        └─ waiter ────────────────┴─► ProcessSink ──► supervisor loop
//! ```

pub mod handle;
pub mod launcher;

use tokio::sync::mpsc;

pub use handle::{ExitWatch, ProcessHandle};
pub use launcher::{LaunchSpec, Launcher, TokioLauncher};

/// Which of the two supervised programs a message refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagedProcess {
    /// The streaming node
    Node,
    /// The transcoder pushing to the local RTMP relay
    Broadcaster,
}

impl ManagedProcess {
    pub fn as_str(self) -> &'static str {
        match self {
            ManagedProcess::Node => "node",
            ManagedProcess::Broadcaster => "broadcaster",
        }
    }
}

impl std::fmt::Display for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output stream a line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal, if any (unix only)
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Something a managed process did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// One line of output
    Output { stream: OutputStream, line: String },
    /// The process is gone; always the last event for a generation
    Exited(ExitInfo),
}

/// Tagged process event delivered to the supervisor loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMessage {
    pub process: ManagedProcess,
    pub generation: u64,
    pub event: ProcessEvent,
}

/// Sending side handed to a launcher for one spawn attempt
#[derive(Debug, Clone)]
pub struct ProcessSink {
    tx: mpsc::UnboundedSender<ProcessMessage>,
    process: ManagedProcess,
    generation: u64,
}

impl ProcessSink {
    pub fn new(
        tx: mpsc::UnboundedSender<ProcessMessage>,
        process: ManagedProcess,
        generation: u64,
    ) -> Self {
        Self {
            tx,
            process,
            generation,
        }
    }

    pub fn process(&self) -> ManagedProcess {
        self.process
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forward one output line
    pub fn output(&self, stream: OutputStream, line: String) {
        self.send(ProcessEvent::Output { stream, line });
    }

    /// Report the terminal exit
    pub fn exited(&self, info: ExitInfo) {
        self.send(ProcessEvent::Exited(info));
    }

    fn send(&self, event: ProcessEvent) {
        // A closed channel means the supervisor is gone; nobody is left to tell
        let _ = self.tx.send(ProcessMessage {
            process: self.process,
            generation: self.generation,
            event,
        });
    }
}

/// Spawned process owned by a manager, together with its generation
#[derive(Debug)]
pub struct OwnedProcess {
    pub generation: u64,
    pub handle: ProcessHandle,
}

/// What a manager knows about its process
#[derive(Debug, Default)]
pub enum ProcessRef {
    /// Not started
    #[default]
    Absent,
    /// A compatible instance is running that we did not start; never killed
    LocalExternal,
    /// We spawned it and are responsible for terminating it
    Owned(OwnedProcess),
}

impl ProcessRef {
    pub fn kind(&self) -> ProcessRefKind {
        match self {
            ProcessRef::Absent => ProcessRefKind::Absent,
            ProcessRef::LocalExternal => ProcessRefKind::LocalExternal,
            ProcessRef::Owned(_) => ProcessRefKind::Owned,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessRef::Owned(owned) => owned.handle.pid(),
            _ => None,
        }
    }
}

/// Data-less view of a [`ProcessRef`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRefKind {
    Absent,
    LocalExternal,
    Owned,
}
