use serde::Serialize;
use tracing::{debug, warn};

use crate::client::{BotDetectorClient, Pending, Reporter};
use crate::prediction::Prediction;
use crate::sightings::PlayerSighting;

const UNKNOWN_VOTER_ID: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "i8")]
pub enum FeedbackVote {
    Agree,
    Disagree,
}

impl From<FeedbackVote> for i8 {
    fn from(vote: FeedbackVote) -> Self {
        match vote {
            FeedbackVote::Agree => 1,
            FeedbackVote::Disagree => -1,
        }
    }
}

#[derive(Debug, Serialize)]
struct SightingPayload<'a> {
    reported: &'a str,
    region_id: i32,
    x: i32,
    y: i32,
    z: i32,
    on_members_world: bool,
    ts: i64,
    reporter: &'a str,
}

impl<'a> SightingPayload<'a> {
    fn new(sighting: &'a PlayerSighting, reporter: &'a str) -> Self {
        let location = sighting.location();
        Self {
            reported: sighting.name(),
            region_id: sighting.region_id(),
            x: location.x,
            y: location.y,
            z: location.plane,
            on_members_world: sighting.on_restricted_world(),
            ts: sighting.timestamp().timestamp(),
            reporter,
        }
    }
}

/// One user's agreement or disagreement with a prediction they were shown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionFeedback {
    #[serde(rename = "rsn")]
    pub voter_name: String,
    pub voter_id: i64,
    pub subject_id: i64,
    pub vote: FeedbackVote,
    #[serde(rename = "prediction")]
    pub prediction_label: String,
    #[serde(rename = "confidence")]
    pub prediction_confidence: f64,
}

impl BotDetectorClient {
    /// Submits a batch of sightings in one request. Resolves to `false` on any failure;
    /// the caller decides whether to keep the batch for a later attempt.
    pub fn submit_sightings(
        &self,
        sightings: Vec<PlayerSighting>,
        reporter: &Reporter,
        manual: bool,
    ) -> Pending<bool> {
        let client = self.clone();
        let reporter = self.reporter_name(reporter);
        Pending::spawn(&self.runtime, || false, async move {
            client.post_sightings(&sightings, &reporter, manual).await
        })
    }

    pub fn submit_sighting(
        &self,
        sighting: PlayerSighting,
        reporter: &Reporter,
        manual: bool,
    ) -> Pending<bool> {
        self.submit_sightings(vec![sighting], reporter, manual)
    }

    /// Flags the first visible player named exactly `name` as a bot. When nobody
    /// matches, the request still goes out with an empty batch for the backend to reject.
    pub fn report_single<I>(&self, name: &str, visible: I, reporter: &Reporter) -> Pending<bool>
    where
        I: IntoIterator<Item = PlayerSighting>,
    {
        let target: Vec<PlayerSighting> = visible
            .into_iter()
            .find(|sighting| sighting.name() == name)
            .into_iter()
            .collect();
        if target.is_empty() {
            debug!(name = %name, "no visible player matches manual report");
        }
        self.submit_sightings(target, reporter, true)
    }

    /// Sends a vote about `prediction`, or about a placeholder when nothing was looked up.
    pub fn send_feedback(
        &self,
        vote: FeedbackVote,
        prediction: Option<&Prediction>,
        reporter: &Reporter,
    ) -> Pending<bool> {
        let placeholder;
        let prediction = match prediction {
            Some(prediction) => prediction,
            None => {
                placeholder = Prediction::placeholder("");
                &placeholder
            }
        };
        let feedback = PredictionFeedback {
            voter_name: self.reporter_name(reporter),
            voter_id: reporter.player_id.unwrap_or(UNKNOWN_VOTER_ID),
            subject_id: prediction.player_id,
            vote,
            prediction_label: prediction.prediction_label.clone(),
            prediction_confidence: prediction.confidence,
        };

        let client = self.clone();
        Pending::spawn(&self.runtime, || false, async move {
            client.post_feedback(&feedback).await
        })
    }

    async fn post_sightings(&self, sightings: &[PlayerSighting], reporter: &str, manual: bool) -> bool {
        let origin = if manual { "1" } else { "0" };
        let url = match self.endpoint(&["plugin", "detect", origin]) {
            Ok(url) => url,
            Err(err) => {
                warn!(?err, "failed to build sighting endpoint");
                return false;
            }
        };
        let payload: Vec<SightingPayload<'_>> = sightings
            .iter()
            .map(|sighting| SightingPayload::new(sighting, reporter))
            .collect();

        if self.post_json("plugin/detect", url, &payload).await {
            debug!(count = sightings.len(), manual, "submitted player sightings");
            true
        } else {
            self.report_failure("Unable to send player sightings to the Bot Detector. They will be retried later.");
            false
        }
    }

    async fn post_feedback(&self, feedback: &PredictionFeedback) -> bool {
        let url = match self.endpoint(&["plugin", "predictionfeedback", ""]) {
            Ok(url) => url,
            Err(err) => {
                warn!(?err, "failed to build feedback endpoint");
                return false;
            }
        };

        if self.post_json("plugin/predictionfeedback", url, feedback).await {
            debug!(subject_id = feedback.subject_id, "submitted prediction feedback");
            true
        } else {
            self.report_failure("Unable to send prediction feedback to the Bot Detector.");
            false
        }
    }
}
