//! Supervisor configuration
//!
//! Built once by the embedding application and read-only afterwards.
//! Can be constructed with the builder methods or loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SupervisorError};

/// Default interval between health probes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Default delay between stream id probes
pub const DEFAULT_STREAM_ID_INTERVAL: Duration = Duration::from_secs(1);

/// Default time a stopped process gets before it is killed
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Node data directory, relative to the home directory
pub const NODE_DATA_SUBDIR: &str = "Livepeer/livepeernet";

/// One parameter set for launching the broadcaster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct EncodingProfile {
    /// Capture frame rate
    pub frame_rate: u32,
    /// Keyframe interval in frames (used for both keyint and min-keyint)
    pub keyframe_interval: u32,
}

impl EncodingProfile {
    pub const fn new(frame_rate: u32, keyframe_interval: u32) -> Self {
        Self {
            frame_rate,
            keyframe_interval,
        }
    }
}

/// Absolute paths of the two managed executables
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExecutablePaths {
    /// Streaming node binary
    pub node: PathBuf,
    /// Transcoder binary
    pub broadcaster: PathBuf,
}

impl Default for ExecutablePaths {
    fn default() -> Self {
        Self {
            node: PathBuf::from("livepeer"),
            broadcaster: PathBuf::from("ffmpeg"),
        }
    }
}

/// Capture device the broadcaster reads from
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CaptureSource {
    /// ffmpeg input format (`-f`)
    pub format: String,
    /// ffmpeg input device (`-i`)
    pub device: String,
    /// Pixel format requested from the device
    pub pixel_format: String,
}

impl Default for CaptureSource {
    fn default() -> Self {
        Self {
            format: "avfoundation".into(),
            device: "0:0".into(),
            pixel_format: "uyvy422".into(),
        }
    }
}

/// Supervisor configuration options
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Scheme and host of the node HTTP API, without port
    pub host: String,

    /// Node HTTP API port
    pub http_port: u16,

    /// Host the node's monitoring interface reports to
    pub monitor_host: String,

    /// Local RTMP relay port the broadcaster publishes to
    pub rtmp_port: u16,

    /// Home directory containing the node data directory
    pub home_dir: PathBuf,

    /// Ordered broadcaster profiles; later entries are fallbacks
    pub profiles: Vec<EncodingProfile>,

    /// Executables to launch
    pub executables: ExecutablePaths,

    /// Broadcaster capture device
    pub capture: CaptureSource,

    /// Video bitrate passed to the encoder
    pub video_bitrate: String,

    /// Audio bitrate passed to the encoder
    pub audio_bitrate: String,

    /// Health poll period
    pub poll_interval: Duration,

    /// Delay between empty stream id probes
    pub stream_id_interval: Duration,

    /// Give up on the stream id after this many probes (None = never)
    pub stream_id_max_attempts: Option<u32>,

    /// Per-request timeout for the node HTTP API
    pub request_timeout: Duration,

    /// How long a stopped process may take to exit after SIGTERM before
    /// it is killed
    pub stop_grace_period: Duration,

    /// Event bus capacity
    pub event_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            http_port: 8935,
            monitor_host: "http://viz.livepeer.org:8081/metrics".into(),
            rtmp_port: 1935,
            home_dir: PathBuf::from("."),
            profiles: vec![EncodingProfile::new(30, 60), EncodingProfile::new(15, 30)],
            executables: ExecutablePaths::default(),
            capture: CaptureSource::default(),
            video_bitrate: "900k".into(),
            audio_bitrate: "96k".into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stream_id_interval: DEFAULT_STREAM_ID_INTERVAL,
            stream_id_max_attempts: None,
            request_timeout: Duration::from_secs(5),
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
            event_capacity: 256,
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(s).map_err(|e| SupervisorError::Config(e.to_string()))?;
        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SupervisorError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Check invariants the supervisor relies on
    pub fn validate(&self) -> Result<()> {
        if self.profiles.is_empty() {
            return Err(SupervisorError::Config(
                "at least one encoding profile is required".into(),
            ));
        }
        if let Some(i) = self
            .profiles
            .iter()
            .position(|p| p.frame_rate == 0 || p.keyframe_interval == 0)
        {
            return Err(SupervisorError::Config(format!(
                "profile {} has a zero frame rate or keyframe interval",
                i
            )));
        }
        if self.poll_interval.is_zero() || self.stream_id_interval.is_zero() {
            return Err(SupervisorError::Config(
                "poll intervals must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Base URL of the node HTTP API
    pub fn node_url(&self) -> String {
        format!("{}:{}", self.host.trim_end_matches('/'), self.http_port)
    }

    /// RTMP endpoint the broadcaster publishes to
    pub fn rtmp_url(&self) -> String {
        format!("rtmp://localhost:{}/movie", self.rtmp_port)
    }

    /// Directory owned by the node process
    pub fn node_data_dir(&self) -> PathBuf {
        self.home_dir.join(NODE_DATA_SUBDIR)
    }

    /// Set the node HTTP endpoint
    pub fn node_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.http_port = port;
        self
    }

    /// Set the monitor host
    pub fn monitor_host(mut self, host: impl Into<String>) -> Self {
        self.monitor_host = host.into();
        self
    }

    /// Set the RTMP relay port
    pub fn rtmp_port(mut self, port: u16) -> Self {
        self.rtmp_port = port;
        self
    }

    /// Set the home directory
    pub fn home_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.home_dir = dir.into();
        self
    }

    /// Replace the profile list
    pub fn profiles(mut self, profiles: Vec<EncodingProfile>) -> Self {
        self.profiles = profiles;
        self
    }

    /// Set the executable paths
    pub fn executables(mut self, executables: ExecutablePaths) -> Self {
        self.executables = executables;
        self
    }

    /// Set the health poll period
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the stream id retry interval and optional attempt cap
    pub fn stream_id_retry(mut self, interval: Duration, max_attempts: Option<u32>) -> Self {
        self.stream_id_interval = interval;
        self.stream_id_max_attempts = max_attempts;
        self
    }

    /// Set the HTTP request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the grace period between SIGTERM and SIGKILL
    pub fn stop_grace_period(mut self, grace: Duration) -> Self {
        self.stop_grace_period = grace;
        self
    }
}

/// On-disk representation; every field is optional and falls back to the default
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    host: Option<String>,
    http_port: Option<u16>,
    monitor_host: Option<String>,
    rtmp_port: Option<u16>,
    home_dir: Option<PathBuf>,
    profiles: Option<Vec<EncodingProfile>>,
    executables: Option<ExecutablePaths>,
    capture: Option<CaptureSource>,
    video_bitrate: Option<String>,
    audio_bitrate: Option<String>,
    poll_interval_ms: Option<u64>,
    stream_id_interval_ms: Option<u64>,
    stream_id_max_attempts: Option<u32>,
    request_timeout_ms: Option<u64>,
    stop_grace_period_ms: Option<u64>,
    event_capacity: Option<usize>,
}

impl ConfigFile {
    fn into_config(self) -> SupervisorConfig {
        let d = SupervisorConfig::default();
        let ms = Duration::from_millis;
        SupervisorConfig {
            host: self.host.unwrap_or(d.host),
            http_port: self.http_port.unwrap_or(d.http_port),
            monitor_host: self.monitor_host.unwrap_or(d.monitor_host),
            rtmp_port: self.rtmp_port.unwrap_or(d.rtmp_port),
            home_dir: self.home_dir.unwrap_or(d.home_dir),
            profiles: self.profiles.unwrap_or(d.profiles),
            executables: self.executables.unwrap_or(d.executables),
            capture: self.capture.unwrap_or(d.capture),
            video_bitrate: self.video_bitrate.unwrap_or(d.video_bitrate),
            audio_bitrate: self.audio_bitrate.unwrap_or(d.audio_bitrate),
            poll_interval: self.poll_interval_ms.map(ms).unwrap_or(d.poll_interval),
            stream_id_interval: self
                .stream_id_interval_ms
                .map(ms)
                .unwrap_or(d.stream_id_interval),
            stream_id_max_attempts: self.stream_id_max_attempts.or(d.stream_id_max_attempts),
            request_timeout: self.request_timeout_ms.map(ms).unwrap_or(d.request_timeout),
            stop_grace_period: self
                .stop_grace_period_ms
                .map(ms)
                .unwrap_or(d.stop_grace_period),
            event_capacity: self.event_capacity.unwrap_or(d.event_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SupervisorConfig::default();

        assert_eq!(config.http_port, 8935);
        assert_eq!(config.rtmp_port, 1935);
        assert_eq!(config.poll_interval, Duration::from_millis(1500));
        assert_eq!(config.stream_id_interval, Duration::from_secs(1));
        assert!(config.stream_id_max_attempts.is_none());
        assert_eq!(config.profiles.len(), 2);
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_urls() {
        let config = SupervisorConfig::default()
            .node_endpoint("http://127.0.0.1/", 9000)
            .rtmp_port(1940);

        assert_eq!(config.node_url(), "http://127.0.0.1:9000");
        assert_eq!(config.rtmp_url(), "rtmp://localhost:1940/movie");
    }

    #[test]
    fn test_node_data_dir() {
        let config = SupervisorConfig::default().home_dir("/home/alice");

        assert_eq!(
            config.node_data_dir(),
            PathBuf::from("/home/alice/Livepeer/livepeernet")
        );
    }

    #[test]
    fn test_validate_rejects_empty_profiles() {
        let config = SupervisorConfig::default().profiles(vec![]);

        assert!(matches!(config.validate(), Err(SupervisorError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_frame_rate() {
        let config = SupervisorConfig::default()
            .profiles(vec![EncodingProfile::new(30, 60), EncodingProfile::new(0, 30)]);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("profile 1"));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = SupervisorConfig::default().poll_interval(Duration::ZERO);

        tokio_test::assert_err!(config.validate());
    }

    #[test]
    fn test_builder_chaining() {
        let config = SupervisorConfig::default()
            .monitor_host("http://monitor:8081")
            .home_dir("/tmp/home")
            .profiles(vec![EncodingProfile::new(25, 50)])
            .stream_id_retry(Duration::from_millis(200), Some(10))
            .request_timeout(Duration::from_secs(1));

        assert_eq!(config.monitor_host, "http://monitor:8081");
        assert_eq!(config.home_dir, PathBuf::from("/tmp/home"));
        assert_eq!(config.profiles, vec![EncodingProfile::new(25, 50)]);
        assert_eq!(config.stream_id_interval, Duration::from_millis(200));
        assert_eq!(config.stream_id_max_attempts, Some(10));
        assert_eq!(config.request_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            host = "http://127.0.0.1"
            http_port = 7935
            rtmp_port = 1936
            home_dir = "/var/lib/supervisor"
            poll_interval_ms = 500
            stream_id_max_attempts = 30

            [[profiles]]
            frame_rate = 30
            keyframe_interval = 60

            [[profiles]]
            frame_rate = 15
            keyframe_interval = 30

            [executables]
            node = "/opt/livepeer/livepeer"
            broadcaster = "/opt/ffmpeg/ffmpeg"
        "#;

        let config = SupervisorConfig::from_toml_str(toml).unwrap();

        assert_eq!(config.node_url(), "http://127.0.0.1:7935");
        assert_eq!(config.rtmp_port, 1936);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.stream_id_max_attempts, Some(30));
        assert_eq!(
            config.profiles,
            vec![EncodingProfile::new(30, 60), EncodingProfile::new(15, 30)]
        );
        assert_eq!(
            config.executables.node,
            PathBuf::from("/opt/livepeer/livepeer")
        );
        // Unset fields keep their defaults
        assert_eq!(config.capture, CaptureSource::default());
        assert_eq!(config.video_bitrate, "900k");
    }

    #[test]
    fn test_from_toml_rejects_unknown_field() {
        let result = SupervisorConfig::from_toml_str("htp_port = 1");

        assert!(matches!(result, Err(SupervisorError::Config(_))));
    }

    #[test]
    fn test_from_toml_validates() {
        let result = SupervisorConfig::from_toml_str("profiles = []");

        assert!(matches!(result, Err(SupervisorError::Config(_))));
    }
}
