//! Supervise a local node and broadcaster
//!
//! Run with: cargo run --example supervise [CONFIG.toml]
//!
//! Without a config file the defaults are used: `livepeer` and `ffmpeg` from
//! `PATH`, node API on http://localhost:8935, RTMP relay on port 1935.
//!
//! Events are printed as JSON lines on stdout. Press Ctrl-C to stop both
//! processes and exit.

use livepeer_supervisor::{Event, Supervisor, SupervisorConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("livepeer_supervisor=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SupervisorConfig::from_toml_file(path)?,
        None => SupervisorConfig::default(),
    };

    let supervisor = Supervisor::start(config)?;
    let mut events = supervisor.subscribe();

    supervisor.start_node().await?;
    supervisor.start_broadcaster(0).await?;
    supervisor.get_stream_id().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    if let Event::BroadcastReady { stream_id } = &event {
                        match supervisor.get_video(stream_id).await {
                            Ok(playlist) => tracing::info!(bytes = playlist.len(), "Playlist available"),
                            Err(e) => tracing::warn!(error = %e, "Playlist not available yet"),
                        }
                    }
                    if matches!(event, Event::Fatal { .. }) {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event consumer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    supervisor.shutdown().await;
    Ok(())
}
