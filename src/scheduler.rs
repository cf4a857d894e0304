//! Debounced recompute scheduling for sell-side edits. Coalesces bursts of
//! condition/attribute changes into one remote call, cancels superseded work
//! at the network level, and applies results only for the newest generation.

use crate::generation::Generations;
use crate::models::AttributeMap;
use crate::remote::{RemoteError, RemoteOps};
use crate::session::Session;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Quiet period between the last edit and the dispatched recompute.
pub const DEBOUNCE: Duration = Duration::from_millis(800);

pub struct RecomputeScheduler {
    remote: Arc<dyn RemoteOps>,
    session: Session,
    generations: Arc<Generations>,
    refreshing: watch::Sender<bool>,
    active: Mutex<Option<CancellationToken>>,
}

impl RecomputeScheduler {
    pub fn new(remote: Arc<dyn RemoteOps>, session: Session, generations: Arc<Generations>) -> Self {
        let (refreshing, _) = watch::channel(false);
        Self {
            remote,
            session,
            generations,
            refreshing,
            active: Mutex::new(None),
        }
    }

    pub fn subscribe_refreshing(&self) -> watch::Receiver<bool> {
        self.refreshing.subscribe()
    }

    pub fn is_refreshing(&self) -> bool {
        *self.refreshing.borrow()
    }

    /// Queue a recompute for the given inputs. The refreshing flag flips
    /// before any timer or network work so the UI never shows numbers that
    /// disagree with the latest edits, even momentarily.
    pub fn schedule(&self, condition: Option<u8>, attributes: AttributeMap) {
        let snapshot = self.session.snapshot();
        let Some(query) = snapshot.query else {
            debug!(target: "marketmaker.scheduler", "schedule ignored, no active query");
            return;
        };

        self.refreshing.send_replace(true);
        let token = self.generations.next();

        let cancel = CancellationToken::new();
        let previous = self
            .active
            .lock()
            .expect("scheduler lock")
            .replace(cancel.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let remote = self.remote.clone();
        let session = self.session.clone();
        let generations = self.generations.clone();
        let refreshing = self.refreshing.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(DEBOUNCE) => {}
            }

            debug!(
                target: "marketmaker.scheduler",
                generation = token,
                condition,
                "dispatching recompute"
            );
            let result = remote
                .sell_advice(&query.text, condition, &attributes, cancel.clone())
                .await;

            if !generations.is_current(token) {
                // A newer schedule owns the refreshing flag now.
                debug!(
                    target: "marketmaker.scheduler",
                    generation = token,
                    "discarding stale recompute"
                );
                return;
            }

            match result {
                Ok(advice) => {
                    session.update(|s| s.sell = Some(advice));
                    refreshing.send_replace(false);
                }
                Err(RemoteError::Cancelled) => {}
                Err(err) => {
                    // Silent by design: keep the last good result on screen.
                    debug!(target: "marketmaker.scheduler", error = %err, "recompute failed");
                    refreshing.send_replace(false);
                }
            }
        });
    }

    /// Cancel any pending or in-flight recompute and clear the indicator.
    /// Used on reset and resubmission.
    pub fn cancel_pending(&self) {
        if let Some(token) = self.active.lock().expect("scheduler lock").take() {
            token.cancel();
        }
        self.refreshing.send_replace(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mode, SearchQuery, SellAdvice};
    use crate::models::{BuyAnalysis, ImageAnalysis, ImageUpload, ProductField, RefinementCheck};
    use crate::remote::RemoteResult;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    fn advice_for(condition: Option<u8>, attributes: &AttributeMap) -> SellAdvice {
        SellAdvice {
            query: attributes
                .values()
                .cloned()
                .collect::<Vec<_>>()
                .join(" "),
            fair_value: condition.unwrap_or(0) as f64,
            mean_price: 0.0,
            min_price: 0.0,
            max_price: 0.0,
            sample_size: 0,
            std_dev: 0.0,
            confidence: "high".into(),
            tiers: Vec::new(),
            recommended_tier: None,
        }
    }

    /// Sell-only facade that records calls and can delay or fail. Ignores the
    /// cancellation token on purpose so the generation guard gets exercised.
    struct SellRemote {
        delays: Mutex<VecDeque<Duration>>,
        fail: bool,
        calls: Mutex<Vec<(Option<u8>, AttributeMap)>>,
    }

    impl SellRemote {
        fn new() -> Self {
            Self {
                delays: Mutex::new(VecDeque::new()),
                fail: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with_delays(delays: Vec<Duration>) -> Self {
            Self {
                delays: Mutex::new(delays.into()),
                ..Self::new()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn calls(&self) -> Vec<(Option<u8>, AttributeMap)> {
            self.calls.lock().expect("calls").clone()
        }
    }

    #[async_trait]
    impl RemoteOps for SellRemote {
        async fn check_refinement(&self, _query: &str) -> RemoteResult<RefinementCheck> {
            Err(RemoteError::service("not under test"))
        }

        async fn analyze_buy(&self, _query: &str) -> RemoteResult<BuyAnalysis> {
            Err(RemoteError::service("not under test"))
        }

        async fn sell_advice(
            &self,
            _query: &str,
            condition: Option<u8>,
            details: &AttributeMap,
            _cancel: CancellationToken,
        ) -> RemoteResult<SellAdvice> {
            self.calls
                .lock()
                .expect("calls")
                .push((condition, details.clone()));
            let delay = self.delays.lock().expect("delays").pop_front();
            if let Some(delay) = delay {
                sleep(delay).await;
            }
            if self.fail {
                return Err(RemoteError::service("sold history unavailable"));
            }
            Ok(advice_for(condition, details))
        }

        async fn product_fields(&self, _query: &str) -> RemoteResult<Vec<ProductField>> {
            Err(RemoteError::service("not under test"))
        }

        async fn analyze_image(&self, _upload: ImageUpload) -> RemoteResult<ImageAnalysis> {
            Err(RemoteError::service("not under test"))
        }
    }

    fn scheduler_with(remote: Arc<SellRemote>) -> (RecomputeScheduler, Session) {
        let session = Session::new();
        session.update(|s| s.query = Some(SearchQuery::new("camera", Mode::Sell)));
        let scheduler = RecomputeScheduler::new(
            remote,
            session.clone(),
            Arc::new(Generations::new()),
        );
        (scheduler, session)
    }

    fn attrs(pairs: &[(&str, &str)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn refreshing_flag_flips_before_dispatch() {
        let remote = Arc::new(SellRemote::new());
        let (scheduler, _session) = scheduler_with(remote.clone());

        scheduler.schedule(Some(7), attrs(&[("color", "black")]));
        // Synchronous: no time has elapsed, nothing dispatched yet.
        assert!(scheduler.is_refreshing());
        assert!(remote.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_edits_dispatches_once_with_last_arguments() {
        let remote = Arc::new(SellRemote::new());
        let (scheduler, session) = scheduler_with(remote.clone());

        for rating in 1..=5u8 {
            scheduler.schedule(Some(rating), attrs(&[("edit", rating.to_string().as_str())]));
            sleep(Duration::from_millis(100)).await;
        }
        sleep(DEBOUNCE + Duration::from_millis(100)).await;

        let calls = remote.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Some(5));
        assert_eq!(calls[0].1, attrs(&[("edit", "5")]));
        assert!(!scheduler.is_refreshing());
        assert_eq!(session.snapshot().sell.expect("applied").fair_value, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_stale_result_never_clobbers_newer_one() {
        // First call resolves long after the second; only the second applies.
        let remote = Arc::new(SellRemote::with_delays(vec![
            Duration::from_secs(10),
            Duration::from_millis(50),
        ]));
        let (scheduler, session) = scheduler_with(remote.clone());

        scheduler.schedule(Some(3), attrs(&[("color", "red")]));
        sleep(DEBOUNCE + Duration::from_millis(50)).await; // first dispatches
        scheduler.schedule(Some(9), attrs(&[("color", "blue")]));
        sleep(DEBOUNCE + Duration::from_millis(100)).await; // second resolves

        let applied = session.snapshot().sell.expect("second result applied");
        assert_eq!(applied.fair_value, 9.0);
        assert!(!scheduler.is_refreshing());

        // Let the slow first call finish; it must change nothing.
        sleep(Duration::from_secs(15)).await;
        let still = session.snapshot().sell.expect("unchanged");
        assert_eq!(still.fair_value, 9.0);
        assert_eq!(remote.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_without_active_query_is_noop() {
        let remote = Arc::new(SellRemote::new());
        let session = Session::new();
        let scheduler =
            RecomputeScheduler::new(remote.clone(), session, Arc::new(Generations::new()));

        scheduler.schedule(Some(5), AttributeMap::new());
        sleep(DEBOUNCE + Duration::from_secs(1)).await;
        assert!(!scheduler.is_refreshing());
        assert!(remote.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn recompute_failure_is_silent_and_keeps_last_result() {
        let remote = Arc::new(SellRemote::failing());
        let (scheduler, session) = scheduler_with(remote.clone());
        let previous = advice_for(Some(6), &attrs(&[("color", "black")]));
        session.update(|s| s.sell = Some(previous.clone()));

        scheduler.schedule(Some(2), attrs(&[("color", "green")]));
        sleep(DEBOUNCE + Duration::from_millis(100)).await;

        let snapshot = session.snapshot();
        assert_eq!(snapshot.sell, Some(previous));
        assert!(snapshot.error.is_none());
        assert!(!scheduler.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_pending_clears_flag_and_stops_dispatch() {
        let remote = Arc::new(SellRemote::new());
        let (scheduler, _session) = scheduler_with(remote.clone());

        scheduler.schedule(Some(4), AttributeMap::new());
        assert!(scheduler.is_refreshing());
        scheduler.cancel_pending();
        assert!(!scheduler.is_refreshing());

        sleep(DEBOUNCE + Duration::from_secs(1)).await;
        assert!(remote.calls().is_empty());
    }
}
