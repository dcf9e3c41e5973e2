//! Stream-ready notification
//!
//! Once the node and broadcaster are both up the node assigns a stream id.
//! Until then `/streamID` answers with an empty body. The notifier polls it,
//! publishes `broadcastReady` exactly once when an id shows up, and stops.
//! Probe errors are logged and polling continues; only an empty versus
//! non-empty answer decides when to stop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::events::{Event, EventBus};
use crate::node_api::NodeApi;

/// Polls for the stream id
pub struct StreamReadyNotifier<A> {
    api: Arc<A>,
    bus: EventBus,
    interval: Duration,
    max_attempts: Option<u32>,
}

impl<A: NodeApi> StreamReadyNotifier<A> {
    pub fn new(api: Arc<A>, bus: EventBus, interval: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            api,
            bus,
            interval,
            max_attempts,
        }
    }

    /// Poll until an id is assigned, the attempt cap is hit or `token` is
    /// cancelled. Returns the id when one was published.
    pub async fn run(self, token: CancellationToken) -> Option<String> {
        let mut attempts: u32 = 0;

        loop {
            if token.is_cancelled() {
                return None;
            }
            attempts += 1;

            match self.api.stream_id().await {
                Ok(id) if !id.is_empty() => {
                    tracing::info!(stream_id = %id, attempts = attempts, "Broadcast ready");
                    self.bus.publish(Event::BroadcastReady {
                        stream_id: id.clone(),
                    });
                    return Some(id);
                }
                Ok(_) => tracing::debug!(attempts = attempts, "No stream id yet"),
                Err(e) => tracing::info!(error = %e, "Stream id probe failed"),
            }

            if self.max_attempts.is_some_and(|max| attempts >= max) {
                tracing::warn!(attempts = attempts, "Giving up waiting for a stream id");
                return None;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::error::ProbeError;
    use crate::testing::FakeNodeApi;

    fn notifier(
        api: &Arc<FakeNodeApi>,
        max_attempts: Option<u32>,
    ) -> (StreamReadyNotifier<FakeNodeApi>, tokio::sync::broadcast::Receiver<Event>) {
        let bus = EventBus::new(16);
        let rx = bus.subscribe();
        (
            StreamReadyNotifier::new(api.clone(), bus, Duration::from_secs(1), max_attempts),
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_id_assigned() {
        let api = Arc::new(FakeNodeApi::down());
        api.push_stream_id(Ok(String::new()));
        api.push_stream_id(Err(ProbeError::Refused));
        api.push_stream_id(Err(ProbeError::Other("404 Not Found".into())));
        api.push_stream_id(Ok(String::new()));
        api.push_stream_id(Ok("deadbeef".into()));
        let (notifier, mut rx) = notifier(&api, None);

        let id = notifier.run(CancellationToken::new()).await;

        assert_eq!(id.as_deref(), Some("deadbeef"));
        assert_eq!(api.stream_id_calls(), 5);
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::BroadcastReady {
                stream_id: "deadbeef".into()
            }
        );
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_interval_between_probes() {
        let api = Arc::new(FakeNodeApi::down());
        let (notifier, _rx) = notifier(&api, None);
        let token = CancellationToken::new();
        let task = tokio::spawn(notifier.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(api.stream_id_calls(), 3);

        token.cancel();
        assert_eq!(task.await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let api = Arc::new(FakeNodeApi::down());
        let (notifier, mut rx) = notifier(&api, Some(5));

        assert_eq!(notifier.run(CancellationToken::new()).await, None);
        assert_eq!(api.stream_id_calls(), 5);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let api = Arc::new(FakeNodeApi::down());
        let (notifier, _rx) = notifier(&api, None);
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(notifier.run(token).await, None);
        assert_eq!(api.stream_id_calls(), 0);
    }
}
