//! Process launching
//!
//! [`Launcher`] is the seam between the managers and the OS. The production
//! [`TokioLauncher`] spawns through `tokio::process`, reads both output
//! streams line by line and reports the exit through the sink. Termination
//! is SIGTERM first, SIGKILL after a grace period.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::{ExitInfo, ManagedProcess, OutputStream, ProcessHandle, ProcessSink};
use crate::config::{EncodingProfile, SupervisorConfig, DEFAULT_STOP_GRACE_PERIOD};

/// Program and arguments for one spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub process: ManagedProcess,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchSpec {
    /// Node with its monitoring interface enabled
    pub fn node(config: &SupervisorConfig) -> Self {
        Self {
            process: ManagedProcess::Node,
            program: config.executables.node.clone(),
            args: vec![
                "-monitor".into(),
                "-monitorhost".into(),
                config.monitor_host.clone(),
            ],
        }
    }

    /// Broadcaster encoding the capture source with `profile`
    pub fn broadcaster(config: &SupervisorConfig, profile: &EncodingProfile) -> Self {
        let capture = &config.capture;
        let frame_rate = profile.frame_rate.to_string();
        let keyint = profile.keyframe_interval;
        let x264_params = format!("keyint={}:min-keyint={}", keyint, keyint);
        let target = config.rtmp_url();

        let args = [
            "-f",
            capture.format.as_str(),
            "-framerate",
            frame_rate.as_str(),
            "-pixel_format",
            capture.pixel_format.as_str(),
            "-i",
            capture.device.as_str(),
            "-vcodec",
            "libx264",
            "-tune",
            "zerolatency",
            "-b",
            config.video_bitrate.as_str(),
            "-x264-params",
            x264_params.as_str(),
            "-acodec",
            "aac",
            "-ac",
            "1",
            "-b:a",
            config.audio_bitrate.as_str(),
            "-f",
            "flv",
            target.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self {
            process: ManagedProcess::Broadcaster,
            program: config.executables.broadcaster.clone(),
            args,
        }
    }

    /// Full command line, for logs
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Spawns managed processes
pub trait Launcher: Send + Sync + 'static {
    /// Start the process described by `spec`
    ///
    /// Returns once the OS accepted the process. Output and the exit status
    /// arrive later through `sink`, the exit after the last output line.
    fn spawn(&self, spec: &LaunchSpec, sink: ProcessSink) -> std::io::Result<ProcessHandle>;
}

/// How long the output readers may lag behind the exit
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Launcher backed by `tokio::process`
///
/// Must be used from within a tokio runtime. Terminating a process sends
/// SIGTERM first and kills it only if it is still running after
/// `kill_after`.
#[derive(Debug, Clone, Copy)]
pub struct TokioLauncher {
    kill_after: Duration,
}

impl TokioLauncher {
    pub fn new() -> Self {
        Self {
            kill_after: DEFAULT_STOP_GRACE_PERIOD,
        }
    }

    /// Set how long a terminated process may take to exit on its own
    pub fn kill_after(mut self, grace: Duration) -> Self {
        self.kill_after = grace;
        self
    }
}

impl Default for TokioLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl Launcher for TokioLauncher {
    fn spawn(&self, spec: &LaunchSpec, sink: ProcessSink) -> std::io::Result<ProcessHandle> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(
                stdout,
                OutputStream::Stdout,
                sink.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(
                stderr,
                OutputStream::Stderr,
                sink.clone(),
            )));
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);
        let process = spec.process;
        let kill_after = self.kill_after;

        tokio::spawn(async move {
            // Both an explicit terminate and a dropped handle end up in the second branch
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };

            let status = match exited {
                Some(status) => status,
                None => shut_down(&mut child, process, kill_after).await,
            };

            let info = match status {
                Ok(status) => ExitInfo::from(status),
                Err(e) => {
                    tracing::warn!(process = %process, error = %e, "Failed to collect exit status");
                    ExitInfo::default()
                }
            };

            // Exited must be the last message of this generation
            drain_output(readers, process).await;

            let _ = exit_tx.send(Some(info));
            sink.exited(info);
        });

        Ok(ProcessHandle::new(pid, kill_tx, exit_rx))
    }
}

/// Ask the child to exit, then kill it once `kill_after` has passed
async fn shut_down(
    child: &mut Child,
    process: ManagedProcess,
    kill_after: Duration,
) -> std::io::Result<ExitStatus> {
    if request_exit(child, process) {
        match tokio::time::timeout(kill_after, child.wait()).await {
            Ok(status) => return status,
            Err(_) => {
                tracing::warn!(
                    process = %process,
                    grace = ?kill_after,
                    "Process still running after termination signal, killing"
                );
            }
        }
    }

    if let Err(e) = child.start_kill() {
        tracing::debug!(process = %process, error = %e, "Kill failed");
    }
    child.wait().await
}

/// Send SIGTERM; returns false if the signal could not be delivered
#[cfg(unix)]
fn request_exit(child: &Child, process: ManagedProcess) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // Already reaped
    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return false;
    };

    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(process = %process, pid = pid, error = %e, "SIGTERM failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn request_exit(_child: &Child, _process: ManagedProcess) -> bool {
    false
}

/// Let the readers forward what is left in the pipes
///
/// A pipe inherited by a grandchild may stay open after the exit; such
/// readers are cut off after a short wait.
async fn drain_output(readers: Vec<JoinHandle<()>>, process: ManagedProcess) {
    let aborts: Vec<_> = readers.iter().map(|r| r.abort_handle()).collect();
    let drained = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
        for reader in readers {
            let _ = reader.await;
        }
    })
    .await;

    if drained.is_err() {
        tracing::debug!(process = %process, "Output still open after exit, dropping it");
        for abort in aborts {
            abort.abort();
        }
    }
}

async fn forward_lines<R>(reader: R, stream: OutputStream, sink: ProcessSink)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => sink.output(stream, line),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(
                    process = %sink.process(),
                    stream = stream.as_str(),
                    error = %e,
                    "Output stream closed with error"
                );
                break;
            }
        }
    }
}
