use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::AuthTokenPermission;
use crate::client::{BotDetectorClient, Pending};
use crate::errors::{AppError, AppResult};
use crate::names::validate_name;

pub const INDETERMINATE_PLAYER_ID: i64 = -1;
const PLACEHOLDER_LABEL: &str = "Unknown";

/// Backend classification for one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub player_id: i64,
    pub player_name: String,
    pub prediction_label: String,
    #[serde(rename = "prediction_confidence")]
    pub confidence: f64,
    /// Alternative labels, highest confidence first, in the order the backend sent them.
    #[serde(rename = "secondary_predictions", default)]
    pub secondary: Vec<(String, f64)>,
}

impl Prediction {
    pub fn placeholder(player_name: impl Into<String>) -> Self {
        Self {
            player_id: INDETERMINATE_PLAYER_ID,
            player_name: player_name.into(),
            prediction_label: PLACEHOLDER_LABEL.to_string(),
            confidence: 0.0,
            secondary: Vec::new(),
        }
    }

    /// The backend answered but could not classify the player.
    pub fn is_indeterminate(&self) -> bool {
        self.player_id == INDETERMINATE_PLAYER_ID
    }

    pub fn display_label(&self) -> String {
        display_label(&self.prediction_label)
    }
}

/// `Real_Player` -> `Real Player`.
pub fn display_label(label: &str) -> String {
    label.replace('_', " ").trim().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub reports: u64,
    pub bans: u64,
    pub possible_bans: u64,
    #[serde(default)]
    accuracy: Option<f64>,
}

impl PlayerStats {
    pub fn new(reports: u64, bans: u64, possible_bans: u64) -> Self {
        Self {
            reports,
            bans,
            possible_bans,
            accuracy: None,
        }
    }

    /// Share of reports that led to bans; zero when nothing was reported.
    pub fn accuracy(&self) -> f64 {
        if let Some(accuracy) = self.accuracy.filter(|value| value.is_finite()) {
            return accuracy;
        }
        if self.reports == 0 {
            0.0
        } else {
            self.bans as f64 / self.reports as f64
        }
    }
}

#[derive(Debug, Serialize)]
struct IdentityLinkPayload<'a> {
    player_name: &'a str,
    code: &'a str,
}

impl BotDetectorClient {
    /// Looks up the prediction for `name`. Invalid names are rejected before any
    /// request; transport, status and decode failures resolve to `None`.
    pub fn request_prediction(&self, name: &str) -> AppResult<Pending<Option<Prediction>>> {
        let name = validate_name(name)?;
        let url = self.endpoint(&["site", "prediction", &name])?;
        let client = self.clone();
        Ok(Pending::spawn(&self.runtime, || None, async move {
            let prediction = client.get_json::<Prediction>("site/prediction", url).await;
            match &prediction {
                Some(found) => debug!(
                    name = %name,
                    label = %found.prediction_label,
                    indeterminate = found.is_indeterminate(),
                    "received prediction"
                ),
                None => client.report_failure(&format!("Unable to retrieve a prediction for {name}.")),
            }
            prediction
        }))
    }

    pub fn request_player_stats(&self, name: &str) -> AppResult<Pending<Option<PlayerStats>>> {
        let name = validate_name(name)?;
        let url = self.endpoint(&["stats", "contributions", &name])?;
        let client = self.clone();
        Ok(Pending::spawn(&self.runtime, || None, async move {
            let stats = client.get_json::<PlayerStats>("stats/contributions", url).await;
            if stats.is_none() {
                client.report_failure(&format!("Unable to retrieve contribution stats for {name}."));
            }
            stats
        }))
    }

    /// Links `name` to an external account using a one-time `code`. Needs
    /// `VERIFY_DISCORD`; without it this fails locally and nothing is sent.
    pub fn verify_identity_link(&self, name: &str, code: &str) -> AppResult<Pending<bool>> {
        let token = self.token_with(AuthTokenPermission::VerifyDiscord)?;
        let name = validate_name(name)?;
        let code = code.trim().to_string();
        if code.is_empty() {
            return Err(AppError::InvalidInput("verification code is empty".into()));
        }
        let url = self.token_endpoint(&["site", "discord_user"], &token)?;

        let client = self.clone();
        Ok(Pending::spawn(&self.runtime, || false, async move {
            let payload = IdentityLinkPayload {
                player_name: &name,
                code: &code,
            };
            let linked = client.post_json("site/discord_user", url, &payload).await;
            if !linked {
                client.report_failure("Unable to verify the account link code.");
            }
            linked
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{"player_id":5,"player_name":"Zezima","prediction_label":"Real_Player","prediction_confidence":0.97,"secondary_predictions":[["Real_Player",0.97],["Bot",0.03]]}"#;

    #[test]
    fn decodes_secondary_predictions_in_order() {
        let prediction: Prediction = serde_json::from_str(FIXTURE).unwrap();
        assert_eq!(prediction.player_id, 5);
        assert_eq!(prediction.display_label(), "Real Player");
        assert_eq!(
            prediction.secondary,
            vec![("Real_Player".to_string(), 0.97), ("Bot".to_string(), 0.03)]
        );
        assert!(!prediction.is_indeterminate());
    }

    #[test]
    fn indeterminate_prediction_still_decodes() {
        let body = r#"{"player_id":-1,"player_name":"Nobody","prediction_label":"Stats_Too_Low","prediction_confidence":0.0,"secondary_predictions":[]}"#;
        let prediction: Prediction = serde_json::from_str(body).unwrap();
        assert!(prediction.is_indeterminate());
        assert!(prediction.secondary.is_empty());
    }

    #[test]
    fn rejects_secondary_predictions_as_object() {
        let body = r#"{"player_id":5,"player_name":"Zezima","prediction_label":"Bot","prediction_confidence":0.5,"secondary_predictions":{"Bot":0.5}}"#;
        assert!(serde_json::from_str::<Prediction>(body).is_err());
    }

    #[test]
    fn accuracy_is_zero_without_reports() {
        assert_eq!(PlayerStats::new(0, 0, 0).accuracy(), 0.0);
        assert_eq!(PlayerStats::new(4, 1, 2).accuracy(), 0.25);

        let reported: PlayerStats =
            serde_json::from_str(r#"{"reports":10,"bans":5,"possible_bans":1,"accuracy":0.4}"#)
                .unwrap();
        assert_eq!(reported.accuracy(), 0.4);

        let missing: PlayerStats =
            serde_json::from_str(r#"{"reports":0,"bans":0,"possible_bans":0}"#).unwrap();
        assert_eq!(missing.accuracy(), 0.0);
    }
}
