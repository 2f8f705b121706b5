use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::client::{BotDetectorClient, Reporter};
use crate::sightings::{PlayerSighting, SightingAggregator};

/// Destination for drained sighting batches.
#[async_trait]
pub trait SightingSubmitter: Send + Sync {
    async fn submit(&self, batch: Vec<PlayerSighting>, reporter: &Reporter, manual: bool) -> bool;
}

#[async_trait]
impl SightingSubmitter for BotDetectorClient {
    async fn submit(&self, batch: Vec<PlayerSighting>, reporter: &Reporter, manual: bool) -> bool {
        self.submit_sightings(batch, reporter, manual).await
    }
}

#[derive(Debug, Default)]
pub struct SessionStats {
    names_uploaded: AtomicU64,
    batches_submitted: AtomicU64,
    batches_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatsSnapshot {
    pub names_uploaded: u64,
    pub batches_submitted: u64,
    pub batches_failed: u64,
}

impl SessionStats {
    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            names_uploaded: self.names_uploaded.load(Ordering::Relaxed),
            batches_submitted: self.batches_submitted.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
        }
    }

    fn record_success(&self, names: usize) {
        self.names_uploaded.fetch_add(names as u64, Ordering::Relaxed);
        self.batches_submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlushOutcome {
    Empty,
    CoolingDown { retry_in_secs: i64 },
    Submitted { count: usize },
    Failed { restored: usize },
}

/// Collects sightings between flushes and pushes them to a [`SightingSubmitter`].
/// A failed batch goes back into the aggregator for the next flush.
pub struct SightingPipeline {
    aggregator: Mutex<SightingAggregator>,
    submitter: Arc<dyn SightingSubmitter>,
    reporter: Mutex<Reporter>,
    stats: Arc<SessionStats>,
    manual_cooldown: chrono::Duration,
    last_manual_flush: Mutex<Option<DateTime<Utc>>>,
}

impl SightingPipeline {
    pub fn new(submitter: Arc<dyn SightingSubmitter>, manual_cooldown_secs: u64) -> Self {
        let manual_cooldown = i64::try_from(manual_cooldown_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX);
        Self {
            aggregator: Mutex::new(SightingAggregator::new()),
            submitter,
            reporter: Mutex::new(Reporter::anonymous()),
            stats: Arc::new(SessionStats::default()),
            manual_cooldown,
            last_manual_flush: Mutex::new(None),
        }
    }

    /// Returns how many names were not already pending.
    pub fn observe<I>(&self, sightings: I) -> usize
    where
        I: IntoIterator<Item = PlayerSighting>,
    {
        self.aggregator.lock().add(sightings)
    }

    pub fn pending_count(&self) -> usize {
        self.aggregator.lock().len()
    }

    pub fn set_reporter(&self, reporter: Reporter) {
        *self.reporter.lock() = reporter;
    }

    pub fn reporter(&self) -> Reporter {
        self.reporter.lock().clone()
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    pub async fn flush(&self, manual: bool) -> FlushOutcome {
        if manual {
            if let Some(retry_in_secs) = self.cooldown_remaining(Utc::now()) {
                debug!(retry_in_secs, "manual flush requested during cooldown");
                return FlushOutcome::CoolingDown { retry_in_secs };
            }
        }

        let batch = self.aggregator.lock().drain();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        if manual {
            *self.last_manual_flush.lock() = Some(Utc::now());
        }

        let count = batch.len();
        let reporter = self.reporter();
        if self.submitter.submit(batch.clone(), &reporter, manual).await {
            self.stats.record_success(count);
            info!(count, manual, "flushed player sightings");
            FlushOutcome::Submitted { count }
        } else {
            self.stats.record_failure();
            let restored = self.aggregator.lock().restore(batch);
            warn!(count, restored, manual, "sighting flush failed; batch kept for retry");
            FlushOutcome::Failed { restored }
        }
    }

    fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        let last = (*self.last_manual_flush.lock())?;
        let ready_at = last
            .checked_add_signed(self.manual_cooldown)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (now < ready_at).then(|| (ready_at - now).num_seconds().max(1))
    }

    /// Runs passive flushes every `interval` on `runtime`. The first flush
    /// happens one full interval after the call.
    pub fn spawn_auto_flush(self: &Arc<Self>, runtime: &Handle, interval: Duration) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let outcome = pipeline.flush(false).await;
                debug!(?outcome, "auto flush finished");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::sightings::WorldPoint;

    #[derive(Default)]
    struct RecordingSubmitter {
        succeed: std::sync::atomic::AtomicBool,
        batches: Mutex<Vec<(Vec<String>, Reporter, bool)>>,
    }

    impl RecordingSubmitter {
        fn succeeding() -> Arc<Self> {
            let submitter = Self::default();
            submitter.succeed.store(true, Ordering::SeqCst);
            Arc::new(submitter)
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self::default())
        }
    }

    #[async_trait]
    impl SightingSubmitter for RecordingSubmitter {
        async fn submit(&self, batch: Vec<PlayerSighting>, reporter: &Reporter, manual: bool) -> bool {
            let names = batch.iter().map(|s| s.name().to_string()).collect();
            self.batches.lock().push((names, reporter.clone(), manual));
            self.succeed.load(Ordering::SeqCst)
        }
    }

    fn sighting(name: &str) -> PlayerSighting {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        PlayerSighting::at(name, WorldPoint::new(3200, 3200, 0), false, ts)
    }

    #[tokio::test]
    async fn flush_submits_deduplicated_batch() {
        let submitter = RecordingSubmitter::succeeding();
        let pipeline = SightingPipeline::new(submitter.clone(), 0);
        pipeline.set_reporter(Reporter::named("Reporter"));

        assert_eq!(pipeline.observe([sighting("Bob"), sighting("alice"), sighting("BOB")]), 2);
        assert_eq!(pipeline.flush(false).await, FlushOutcome::Submitted { count: 2 });
        assert_eq!(pipeline.pending_count(), 0);

        let batches = submitter.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, vec!["alice".to_string(), "Bob".to_string()]);
        assert_eq!(batches[0].1, Reporter::named("Reporter"));
        assert!(!batches[0].2);

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.names_uploaded, 2);
        assert_eq!(stats.batches_submitted, 1);
        assert_eq!(stats.batches_failed, 0);
    }

    #[tokio::test]
    async fn failed_flush_restores_batch() {
        let submitter = RecordingSubmitter::failing();
        let pipeline = SightingPipeline::new(submitter.clone(), 0);
        pipeline.observe([sighting("Bob"), sighting("Alice")]);

        assert_eq!(pipeline.flush(false).await, FlushOutcome::Failed { restored: 2 });
        assert_eq!(pipeline.pending_count(), 2);
        assert_eq!(pipeline.stats().snapshot().batches_failed, 1);

        submitter.succeed.store(true, Ordering::SeqCst);
        assert_eq!(pipeline.flush(false).await, FlushOutcome::Submitted { count: 2 });
        assert_eq!(submitter.batches.lock().len(), 2);
    }

    #[tokio::test]
    async fn empty_flush_sends_nothing() {
        let submitter = RecordingSubmitter::succeeding();
        let pipeline = SightingPipeline::new(submitter.clone(), 60);
        assert_eq!(pipeline.flush(true).await, FlushOutcome::Empty);
        assert!(submitter.batches.lock().is_empty());

        // an empty manual flush does not start the cooldown
        pipeline.observe([sighting("Bob")]);
        assert_eq!(pipeline.flush(true).await, FlushOutcome::Submitted { count: 1 });
    }

    #[tokio::test]
    async fn manual_flush_respects_cooldown() {
        let submitter = RecordingSubmitter::succeeding();
        let pipeline = SightingPipeline::new(submitter.clone(), 60);
        pipeline.observe([sighting("Bob")]);
        assert_eq!(pipeline.flush(true).await, FlushOutcome::Submitted { count: 1 });

        pipeline.observe([sighting("Alice")]);
        match pipeline.flush(true).await {
            FlushOutcome::CoolingDown { retry_in_secs } => assert!((1..=60).contains(&retry_in_secs)),
            other => panic!("expected cooldown, got {other:?}"),
        }
        assert_eq!(pipeline.pending_count(), 1);

        assert_eq!(pipeline.flush(false).await, FlushOutcome::Submitted { count: 1 });
        let batches = submitter.batches.lock();
        assert!(batches[0].2);
        assert!(!batches[1].2);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_flush_runs_on_interval() {
        let submitter = RecordingSubmitter::succeeding();
        let pipeline = Arc::new(SightingPipeline::new(submitter.clone(), 0));
        pipeline.observe([sighting("Bob")]);

        let task = pipeline.spawn_auto_flush(&Handle::current(), Duration::from_secs(300));
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(submitter.batches.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(submitter.batches.lock().len(), 1);
        assert_eq!(pipeline.pending_count(), 0);
        task.abort();
    }
}
