use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::AuthTokenPermission;
use crate::client::{BotDetectorClient, Pending};
use crate::errors::AppResult;
use crate::names::CaseInsensitiveKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClanRank {
    Guest,
    Recruit,
    Corporal,
    Sergeant,
    Lieutenant,
    Captain,
    General,
    Admin,
    DeputyOwner,
    Owner,
    Jmod,
}

impl ClanRank {
    pub const ALL: [ClanRank; 11] = [
        ClanRank::Guest,
        ClanRank::Recruit,
        ClanRank::Corporal,
        ClanRank::Sergeant,
        ClanRank::Lieutenant,
        ClanRank::Captain,
        ClanRank::General,
        ClanRank::Admin,
        ClanRank::DeputyOwner,
        ClanRank::Owner,
        ClanRank::Jmod,
    ];

    /// Roles the "change rank" picker cannot assign.
    pub const UNASSIGNABLE: [ClanRank; 3] = [ClanRank::Guest, ClanRank::Owner, ClanRank::Jmod];

    /// Text shown for this rank in the rank picker.
    pub fn label(&self) -> &'static str {
        match self {
            ClanRank::Guest => "Guest",
            ClanRank::Recruit => "Recruit",
            ClanRank::Corporal => "Corporal",
            ClanRank::Sergeant => "Sergeant",
            ClanRank::Lieutenant => "Lieutenant",
            ClanRank::Captain => "Captain",
            ClanRank::General => "General",
            ClanRank::Admin => "Admin",
            ClanRank::DeputyOwner => "Deputy Owner",
            ClanRank::Owner => "Owner",
            ClanRank::Jmod => "Jmod",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|rank| rank.label().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for ClanRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Player name to clan rank. Used both for the ranks an external authority
/// wants ([`DesiredRankMap`]) and the ranks currently in effect ([`LiveRankMap`]).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankMap {
    ranks: HashMap<CaseInsensitiveKey, ClanRank>,
}

pub type DesiredRankMap = RankMap;
pub type LiveRankMap = RankMap;

impl RankMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<CaseInsensitiveKey>, rank: ClanRank) -> Option<ClanRank> {
        self.ranks.insert(name.into(), rank)
    }

    pub fn get(&self, key: &CaseInsensitiveKey) -> Option<ClanRank> {
        self.ranks.get(key).copied()
    }

    pub fn rank_of(&self, name: &str) -> Option<ClanRank> {
        self.get(&CaseInsensitiveKey::new(name))
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CaseInsensitiveKey, ClanRank)> {
        self.ranks.iter().map(|(name, rank)| (name, *rank))
    }
}

impl<K: Into<CaseInsensitiveKey>> FromIterator<(K, ClanRank)> for RankMap {
    fn from_iter<I: IntoIterator<Item = (K, ClanRank)>>(iter: I) -> Self {
        Self {
            ranks: iter
                .into_iter()
                .map(|(name, rank)| (name.into(), rank))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MemberRank {
    player: String,
    rank: ClanRank,
}

impl BotDetectorClient {
    /// Sends the current member ranks and receives the ranks the clan's
    /// authority wants applied. Needs `GET_CLAN_RANK_UPDATES`; without it this
    /// fails locally and nothing is sent.
    pub fn request_clan_rank_updates(
        &self,
        members: &LiveRankMap,
    ) -> AppResult<Pending<Option<DesiredRankMap>>> {
        let token = self.token_with(AuthTokenPermission::GetClanRankUpdates)?;
        let url = self.token_endpoint(&["plugin", "clan", "rank-update"], &token)?;
        let mut body: Vec<MemberRank> = members
            .iter()
            .map(|(name, rank)| MemberRank {
                player: name.as_str().to_string(),
                rank,
            })
            .collect();
        body.sort_by(|a, b| a.player.cmp(&b.player));

        let client = self.clone();
        Ok(Pending::spawn(&self.runtime, || None, async move {
            let updates = client
                .post_for_json::<_, Vec<MemberRank>>("plugin/clan/rank-update", url, &body)
                .await;
            match updates {
                Some(updates) => {
                    debug!(count = updates.len(), "received clan rank updates");
                    Some(
                        updates
                            .into_iter()
                            .map(|member| (member.player, member.rank))
                            .collect(),
                    )
                }
                None => {
                    client.report_failure("Unable to retrieve clan rank updates.");
                    None
                }
            }
        }))
    }
}
