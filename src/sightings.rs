use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::names::CaseInsensitiveKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorldPoint {
    pub x: i32,
    pub y: i32,
    pub plane: i32,
}

impl WorldPoint {
    pub fn new(x: i32, y: i32, plane: i32) -> Self {
        Self { x, y, plane }
    }

    /// 64x64 map region containing this point.
    pub fn region_id(&self) -> i32 {
        ((self.x >> 6) << 8) | (self.y >> 6)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSighting {
    name: String,
    region_id: i32,
    x: i32,
    y: i32,
    plane: i32,
    on_restricted_world: bool,
    timestamp: DateTime<Utc>,
}

impl PlayerSighting {
    pub fn new(
        name: impl Into<String>,
        region_id: i32,
        x: i32,
        y: i32,
        plane: i32,
        on_restricted_world: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            region_id,
            x,
            y,
            plane,
            on_restricted_world,
            timestamp,
        }
    }

    pub fn at(
        name: impl Into<String>,
        location: WorldPoint,
        on_restricted_world: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(
            name,
            location.region_id(),
            location.x,
            location.y,
            location.plane,
            on_restricted_world,
            timestamp,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region_id(&self) -> i32 {
        self.region_id
    }

    pub fn location(&self) -> WorldPoint {
        WorldPoint::new(self.x, self.y, self.plane)
    }

    pub fn on_restricted_world(&self) -> bool {
        self.on_restricted_world
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn key(&self) -> CaseInsensitiveKey {
        CaseInsensitiveKey::new(self.name.as_str())
    }
}

/// Pending sightings keyed by player name. The first sighting of a name in a
/// window wins; later ones for the same name are dropped until the next drain.
#[derive(Debug, Default)]
pub struct SightingAggregator {
    pending: HashMap<CaseInsensitiveKey, PlayerSighting>,
}

impl SightingAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<I>(&mut self, sightings: I) -> usize
    where
        I: IntoIterator<Item = PlayerSighting>,
    {
        let before = self.pending.len();
        for sighting in sightings {
            self.pending.entry(sighting.key()).or_insert(sighting);
        }
        self.pending.len() - before
    }

    /// Removes and returns every pending sighting, ordered by name.
    pub fn drain(&mut self) -> Vec<PlayerSighting> {
        let mut batch: Vec<(CaseInsensitiveKey, PlayerSighting)> = self.pending.drain().collect();
        batch.sort_by(|(a, _), (b, _)| a.cmp(b));
        batch.into_iter().map(|(_, sighting)| sighting).collect()
    }

    /// Puts a batch back after a failed submission. Sightings observed while
    /// the batch was in flight are kept over the restored ones.
    pub fn restore(&mut self, batch: Vec<PlayerSighting>) -> usize {
        self.add(batch)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pending.contains_key(&CaseInsensitiveKey::new(name))
    }
}
