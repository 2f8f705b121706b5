mod auth;
mod client;
mod config;
mod errors;
mod names;
mod pipeline;
mod prediction;
mod ranks;
mod reconciler;
mod reporting;
mod sightings;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::auth::{AuthToken, AuthTokenPermission, AuthTokenType};
pub use crate::client::{BotDetectorClient, LogNotifier, Notifier, Pending, Reporter};
pub use crate::config::{AppConfig, PublicAppConfig, DEFAULT_API_BASE_URL};
pub use crate::errors::{AppError, AppResult};
pub use crate::names::{normalize_name, strip_tags, validate_name, CaseInsensitiveKey, MAX_PLAYER_NAME_LENGTH};
pub use crate::pipeline::{FlushOutcome, SessionStats, SessionStatsSnapshot, SightingPipeline, SightingSubmitter};
pub use crate::prediction::{display_label, PlayerStats, Prediction, INDETERMINATE_PLAYER_ID};
pub use crate::ranks::{ClanRank, DesiredRankMap, LiveRankMap, RankMap};
pub use crate::reconciler::{
    RankPopup, RankReconciler, RankWidget, ReconcileReport, ReconcilerConfig, Record, RecordLayout,
    RecordView,
};
pub use crate::reporting::{FeedbackVote, PredictionFeedback};
pub use crate::sightings::{PlayerSighting, SightingAggregator, WorldPoint};

/// Everything a host session needs: the backend client, the sighting
/// pipeline with its auto-flush task, and the rank reconciler.
pub struct BotDetector {
    config: AppConfig,
    client: BotDetectorClient,
    pipeline: Arc<SightingPipeline>,
    reconciler: Arc<RankReconciler>,
    last_prediction: Arc<Mutex<Option<Prediction>>>,
    lookup_generation: Arc<AtomicU64>,
    auto_flush: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectorStatus {
    pub config: PublicAppConfig,
    pub auth_token_type: AuthTokenType,
    pub pending_sightings: usize,
    pub session: SessionStatsSnapshot,
    pub auto_flush_running: bool,
    pub last_prediction: Option<String>,
}

impl BotDetector {
    pub fn initialize(runtime: Handle) -> AppResult<Self> {
        init_tracing();
        Self::with_config(AppConfig::from_env(), runtime)
    }

    pub fn with_config(config: AppConfig, runtime: Handle) -> AppResult<Self> {
        let client = BotDetectorClient::new(&config, runtime.clone())?;
        let pipeline = Arc::new(SightingPipeline::new(
            Arc::new(client.clone()),
            config.manual_send_cooldown_secs,
        ));
        let reconciler = Arc::new(RankReconciler::new(ReconcilerConfig {
            highlight_color: config.rank_highlight_color,
            ..ReconcilerConfig::default()
        }));

        let auto_flush = (config.auto_send_interval_secs > 0).then(|| {
            pipeline.spawn_auto_flush(&runtime, Duration::from_secs(config.auto_send_interval_secs))
        });
        info!(
            api_base_url = %config.api_base_url,
            anonymous = config.anonymous_reporting,
            token_type = %client.auth_token().token_type(),
            auto_flush = auto_flush.is_some(),
            "bot detector initialised"
        );

        Ok(Self {
            config,
            client,
            pipeline,
            reconciler,
            last_prediction: Arc::new(Mutex::new(None)),
            lookup_generation: Arc::new(AtomicU64::new(0)),
            auto_flush,
        })
    }

    pub fn client(&self) -> &BotDetectorClient {
        &self.client
    }

    pub fn pipeline(&self) -> &Arc<SightingPipeline> {
        &self.pipeline
    }

    pub fn reconciler(&self) -> &Arc<RankReconciler> {
        &self.reconciler
    }

    pub fn set_reporter(&self, reporter: Reporter) {
        self.pipeline.set_reporter(reporter);
    }

    pub fn observe<I>(&self, sightings: I) -> usize
    where
        I: IntoIterator<Item = PlayerSighting>,
    {
        self.pipeline.observe(sightings)
    }

    pub async fn flush(&self, manual: bool) -> FlushOutcome {
        self.pipeline.flush(manual).await
    }

    pub fn report_player<I>(&self, name: &str, visible: I) -> Pending<bool>
    where
        I: IntoIterator<Item = PlayerSighting>,
    {
        self.client
            .report_single(name, visible, &self.pipeline.reporter())
    }

    /// Looks up `name` and remembers the answer as the prediction that
    /// feedback refers to. Starting a lookup forgets the previous one, and
    /// only the most recently started lookup may fill the cache.
    pub fn lookup_prediction(&self, name: &str) -> AppResult<Pending<Option<Prediction>>> {
        let lookup = self.client.request_prediction(name)?;
        let generation = {
            let mut cached = self.last_prediction.lock();
            cached.take();
            self.lookup_generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let cache = Arc::clone(&self.last_prediction);
        let latest = Arc::clone(&self.lookup_generation);
        Ok(Pending::spawn(&self.client.runtime, || None, async move {
            let prediction = lookup.await;
            if let Some(found) = &prediction {
                let mut cached = cache.lock();
                if latest.load(Ordering::SeqCst) == generation {
                    *cached = Some(found.clone());
                } else {
                    debug!(player = %found.player_name, "discarding superseded prediction lookup");
                }
            }
            prediction
        }))
    }

    pub fn last_prediction(&self) -> Option<Prediction> {
        self.last_prediction.lock().clone()
    }

    pub fn send_feedback(&self, vote: FeedbackVote) -> Pending<bool> {
        let prediction = self.last_prediction();
        if prediction.is_none() {
            debug!("no prediction cached; sending feedback for placeholder");
        }
        self.client
            .send_feedback(vote, prediction.as_ref(), &self.pipeline.reporter())
    }

    pub fn player_stats(&self, name: &str) -> AppResult<Pending<Option<PlayerStats>>> {
        self.client.request_player_stats(name)
    }

    pub fn verify_identity_link(&self, name: &str, code: &str) -> AppResult<Pending<bool>> {
        self.client.verify_identity_link(name, code)
    }

    /// Fetches the ranks the clan wants and hands them to the reconciler.
    /// Resolves to whether new desired ranks were installed.
    pub fn refresh_clan_ranks(&self, live: &LiveRankMap) -> AppResult<Pending<bool>> {
        let updates = self.client.request_clan_rank_updates(live)?;
        let reconciler = Arc::clone(&self.reconciler);
        Ok(Pending::spawn(&self.client.runtime, || false, async move {
            match updates.await {
                Some(desired) => {
                    reconciler.replace_desired(desired);
                    true
                }
                None => false,
            }
        }))
    }

    pub fn status(&self) -> DetectorStatus {
        DetectorStatus {
            config: self.config.public_profile(),
            auth_token_type: self.client.auth_token().token_type(),
            pending_sightings: self.pipeline.pending_count(),
            session: self.pipeline.stats().snapshot(),
            auto_flush_running: self
                .auto_flush
                .as_ref()
                .is_some_and(|task| !task.is_finished()),
            last_prediction: self
                .last_prediction()
                .map(|prediction| prediction.display_label()),
        }
    }
}

impl Drop for BotDetector {
    fn drop(&mut self) {
        if let Some(task) = self.auto_flush.take() {
            task.abort();
        }
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,bot_detector_client=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
