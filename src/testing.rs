//! In-memory stand-ins for the node API and the OS, shared by unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::{oneshot, watch};

use crate::error::ProbeError;
use crate::node_api::NodeApi;
use crate::process::{
    ExitInfo, LaunchSpec, Launcher, ManagedProcess, OutputStream, ProcessHandle, ProcessSink,
};

/// Scriptable node API
pub(crate) struct FakeNodeApi {
    reachable: AtomicBool,
    peers: Mutex<Result<u64, ProbeError>>,
    /// Peer count answers wait while this is false
    peers_open: watch::Sender<bool>,
    peers_calls: AtomicUsize,
    stream_ids: Mutex<VecDeque<Result<String, ProbeError>>>,
    status_calls: AtomicUsize,
    stream_id_calls: AtomicUsize,
}

impl FakeNodeApi {
    /// Nothing listening yet
    pub(crate) fn down() -> Self {
        Self {
            reachable: AtomicBool::new(false),
            peers: Mutex::new(Err(ProbeError::Refused)),
            peers_open: watch::Sender::new(true),
            peers_calls: AtomicUsize::new(0),
            stream_ids: Mutex::new(VecDeque::new()),
            status_calls: AtomicUsize::new(0),
            stream_id_calls: AtomicUsize::new(0),
        }
    }

    /// A node is already serving the status port
    pub(crate) fn up() -> Self {
        let api = Self::down();
        api.set_reachable(true);
        api
    }

    pub(crate) fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub(crate) fn set_peers(&self, peers: Result<u64, ProbeError>) {
        *self.peers.lock().unwrap() = peers;
    }

    /// Keep peer count requests pending until `release_peers`
    pub(crate) fn hold_peers(&self) {
        self.peers_open.send_replace(false);
    }

    pub(crate) fn release_peers(&self) {
        self.peers_open.send_replace(true);
    }

    pub(crate) fn peers_calls(&self) -> usize {
        self.peers_calls.load(Ordering::SeqCst)
    }

    /// Queue stream id responses; an empty queue answers `""`
    pub(crate) fn push_stream_id(&self, response: Result<String, ProbeError>) {
        self.stream_ids.lock().unwrap().push_back(response);
    }

    pub(crate) fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn stream_id_calls(&self) -> usize {
        self.stream_id_calls.load(Ordering::SeqCst)
    }
}

impl NodeApi for FakeNodeApi {
    async fn status(&self) -> Result<(), ProbeError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProbeError::Refused)
        }
    }

    async fn peers_count(&self) -> Result<u64, ProbeError> {
        self.peers_calls.fetch_add(1, Ordering::SeqCst);
        let mut open = self.peers_open.subscribe();
        let _ = open.wait_for(|open| *open).await;
        self.peers.lock().unwrap().clone()
    }

    async fn stream_id(&self) -> Result<String, ProbeError> {
        self.stream_id_calls.fetch_add(1, Ordering::SeqCst);
        self.stream_ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }

    async fn playlist(&self, stream_id: &str) -> Result<Bytes, ProbeError> {
        if stream_id == "missing" {
            Err(ProbeError::Other("404".into()))
        } else {
            Ok(Bytes::from(format!("#EXTM3U\n#{}\n", stream_id)))
        }
    }
}

struct SpawnRecord {
    spec: LaunchSpec,
    sink: ProcessSink,
    kill_rx: oneshot::Receiver<()>,
    killed: bool,
    exit_tx: watch::Sender<Option<ExitInfo>>,
}

/// Launcher that records spawns and lets the test decide when processes exit
pub(crate) struct ScriptedLauncher {
    spawns: Mutex<Vec<SpawnRecord>>,
    fail: AtomicBool,
    next_pid: AtomicU32,
}

impl ScriptedLauncher {
    pub(crate) fn new() -> Self {
        Self {
            spawns: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            next_pid: AtomicU32::new(1000),
        }
    }

    /// Make every following spawn fail with `NotFound`
    pub(crate) fn fail_spawns(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn spawn_count(&self) -> usize {
        self.spawns.lock().unwrap().len()
    }

    /// Indices of spawns for `process`, oldest first
    pub(crate) fn spawns_of(&self, process: ManagedProcess) -> Vec<usize> {
        self.spawns
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .filter(|(_, r)| r.spec.process == process)
            .map(|(i, _)| i)
            .collect()
    }

    pub(crate) fn spec(&self, index: usize) -> LaunchSpec {
        self.spawns.lock().unwrap()[index].spec.clone()
    }

    /// Whether the owner asked spawn `index` to die (or dropped its handle)
    pub(crate) fn kill_requested(&self, index: usize) -> bool {
        let mut spawns = self.spawns.lock().unwrap();
        let record = &mut spawns[index];
        if !record.killed {
            record.killed = !matches!(
                record.kill_rx.try_recv(),
                Err(oneshot::error::TryRecvError::Empty)
            );
        }
        record.killed
    }

    /// Emit an output line from spawn `index`
    pub(crate) fn output(&self, index: usize, stream: OutputStream, line: &str) {
        self.spawns.lock().unwrap()[index]
            .sink
            .output(stream, line.to_string());
    }

    /// Make spawn `index` exit
    pub(crate) fn exit(&self, index: usize, info: ExitInfo) {
        let spawns = self.spawns.lock().unwrap();
        let record = &spawns[index];
        let _ = record.exit_tx.send(Some(info));
        record.sink.exited(info);
    }
}

impl Launcher for ScriptedLauncher {
    fn spawn(&self, spec: &LaunchSpec, sink: ProcessSink) -> std::io::Result<ProcessHandle> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(std::io::Error::from(std::io::ErrorKind::NotFound));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        self.spawns.lock().unwrap().push(SpawnRecord {
            spec: spec.clone(),
            sink,
            kill_rx,
            killed: false,
            exit_tx,
        });

        Ok(ProcessHandle::new(Some(pid), kill_tx, exit_rx))
    }
}

/// Shared in-memory log sink
#[derive(Clone, Default)]
struct LogBuffer(std::sync::Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Logs recorded on the current thread while this value is alive
pub(crate) struct CapturedLogs {
    buf: LogBuffer,
    _guard: tracing::subscriber::DefaultGuard,
}

impl CapturedLogs {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.0.lock().unwrap()).into_owned()
    }

    /// Number of occurrences of `needle` in the captured output
    pub(crate) fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

/// Record logs for the rest of the (single-threaded) test
pub(crate) fn capture_logs() -> CapturedLogs {
    let buf = LogBuffer::default();
    let writer = buf.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || writer.clone())
        .finish();

    CapturedLogs {
        buf,
        _guard: tracing::subscriber::set_default(subscriber),
    }
}
