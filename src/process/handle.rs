//! Ownership handle for a spawned process
//!
//! The handle is the only way to terminate the process. Dropping it has the
//! same effect as [`ProcessHandle::terminate`], so a process can never
//! outlive the manager that owns it.

use tokio::sync::{oneshot, watch};

use super::ExitInfo;

/// Owned, running process
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: oneshot::Sender<()>,
    exit: ExitWatch,
}

impl ProcessHandle {
    /// Assemble a handle from the launcher's channels
    ///
    /// `kill_tx` fires (or is dropped) when the process should die;
    /// `exit_rx` receives `Some` once it has.
    pub fn new(
        pid: Option<u32>,
        kill_tx: oneshot::Sender<()>,
        exit_rx: watch::Receiver<Option<ExitInfo>>,
    ) -> Self {
        Self {
            pid,
            kill_tx,
            exit: ExitWatch { rx: exit_rx },
        }
    }

    /// OS process id
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status, if the process has already exited
    pub fn try_exit(&self) -> Option<ExitInfo> {
        *self.exit.rx.borrow()
    }

    /// Ask the process to exit and give up ownership
    ///
    /// Returns immediately. The returned watch resolves once the process is
    /// actually gone.
    pub fn terminate(self) -> ExitWatch {
        let _ = self.kill_tx.send(());
        self.exit
    }
}

/// Resolves when a terminated process has exited
#[derive(Debug, Clone)]
pub struct ExitWatch {
    rx: watch::Receiver<Option<ExitInfo>>,
}

impl ExitWatch {
    /// Wait for the exit status
    ///
    /// Returns `None` if the launcher went away without reporting one.
    pub async fn wait(mut self) -> Option<ExitInfo> {
        match self.rx.wait_for(|exit| exit.is_some()).await {
            Ok(exit) => *exit,
            Err(_) => None,
        }
    }
}
