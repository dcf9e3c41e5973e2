//! Periodic node health polling
//!
//! Every tick asks the node for its peer count:
//!
//! - connection refused: the node is not up yet, `loading{add}`
//! - success: `loading{remove}` followed by `peerCount{count}`
//! - anything else: ignored
//!
//! Ignoring the last category is a deliberately permissive policy. It hides
//! failure modes other than "not up yet", so those are at least logged at
//! debug level.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::ProbeError;
use crate::events::{Event, EventBus, LoadingOp};
use crate::node_api::NodeApi;

/// Polls the node's peer count on a fixed period
pub struct HealthPoller<A> {
    api: Arc<A>,
    bus: EventBus,
    period: Duration,
}

impl<A: NodeApi> HealthPoller<A> {
    pub fn new(api: Arc<A>, bus: EventBus, period: Duration) -> Self {
        Self { api, bus, period }
    }

    /// Run until `token` is cancelled
    ///
    /// The first probe happens one period after spawning.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token).await })
    }

    async fn run(self, token: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(period = ?self.period, "Health poller started");
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }
        tracing::debug!("Health poller stopped");
    }

    /// Probe once and publish the outcome
    pub async fn tick(&self) {
        match self.api.peers_count().await {
            Ok(count) => {
                self.bus.publish(Event::loading(LoadingOp::Remove));
                self.bus.publish(Event::PeerCount { count });
            }
            Err(ProbeError::Refused) => {
                self.bus.publish(Event::loading(LoadingOp::Add));
            }
            Err(e) => {
                tracing::debug!(error = %e, "Health probe failed, ignoring");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::testing::FakeNodeApi;

    const PERIOD: Duration = Duration::from_millis(1500);

    fn poller(api: &Arc<FakeNodeApi>) -> (HealthPoller<FakeNodeApi>, tokio::sync::broadcast::Receiver<Event>) {
        let bus = EventBus::new(64);
        let rx = bus.subscribe();
        (HealthPoller::new(api.clone(), bus, PERIOD), rx)
    }

    #[tokio::test]
    async fn test_refused_then_reachable() {
        let api = Arc::new(FakeNodeApi::down());
        let (poller, mut rx) = poller(&api);

        poller.tick().await;
        assert_eq!(rx.try_recv().unwrap(), Event::loading(LoadingOp::Add));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        api.set_peers(Ok(7));
        poller.tick().await;
        assert_eq!(rx.try_recv().unwrap(), Event::loading(LoadingOp::Remove));
        assert_eq!(rx.try_recv().unwrap(), Event::PeerCount { count: 7 });
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn test_other_errors_are_silent() {
        let api = Arc::new(FakeNodeApi::down());
        api.set_peers(Err(ProbeError::Other("502 Bad Gateway".into())));
        let (poller, mut rx) = poller(&api);

        poller.tick().await;

        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_period() {
        let api = Arc::new(FakeNodeApi::down());
        let (poller, mut rx) = poller(&api);
        let token = CancellationToken::new();
        let handle = poller.spawn(token.clone());

        // Nothing before the first period elapses
        tokio::time::sleep(PERIOD / 2).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        tokio::time::sleep(PERIOD).await;
        assert_eq!(rx.try_recv().unwrap(), Event::loading(LoadingOp::Add));

        tokio::time::sleep(PERIOD).await;
        assert_eq!(rx.try_recv().unwrap(), Event::loading(LoadingOp::Add));

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_events_after_cancel() {
        let api = Arc::new(FakeNodeApi::down());
        api.set_peers(Ok(3));
        let (poller, mut rx) = poller(&api);
        let token = CancellationToken::new();
        let handle = poller.spawn(token.clone());

        tokio::time::sleep(PERIOD + PERIOD / 2).await;
        token.cancel();
        handle.await.unwrap();
        while rx.try_recv().is_ok() {}

        tokio::time::sleep(PERIOD * 10).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_pending_at_cancel_publishes_once() {
        let api = Arc::new(FakeNodeApi::down());
        api.set_peers(Ok(3));
        api.hold_peers();
        let (poller, mut rx) = poller(&api);
        let token = CancellationToken::new();
        let handle = poller.spawn(token.clone());

        // The first tick's request is still pending
        tokio::time::sleep(PERIOD + PERIOD / 2).await;
        assert_eq!(api.peers_calls(), 1);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        token.cancel();
        api.release_peers();
        handle.await.unwrap();

        assert_eq!(rx.try_recv().unwrap(), Event::loading(LoadingOp::Remove));
        assert_eq!(rx.try_recv().unwrap(), Event::PeerCount { count: 3 });

        tokio::time::sleep(PERIOD * 10).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(api.peers_calls(), 1);
    }
}
