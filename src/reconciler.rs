//! Highlights clan members whose rank differs from the rank an external
//! authority wants them to have, and the matching option in an open
//! "Set rank" picker.
//!
//! The host UI exposes its widgets as flat, fixed-width sequences. A
//! [`RecordView`] turns such a sequence into typed records so that stride and
//! slot offsets live in one [`RecordLayout`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::names::{normalize_name, strip_tags, CaseInsensitiveKey};
use crate::ranks::{ClanRank, DesiredRankMap, LiveRankMap};

static POPUP_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Set rank for (.+):$").expect("popup title pattern compiles"));

/// A host widget whose text can be read and whose text color can be changed.
pub trait RankWidget {
    fn text(&self) -> String;
    fn set_text_color(&self, rgb: u32);
}

/// Slot positions inside one fixed-width record. For picker options the
/// `name` slot holds the option label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub width: usize,
    pub sprite: usize,
    pub name: usize,
    pub role: usize,
}

impl RecordLayout {
    pub const MEMBER_LIST: RecordLayout = RecordLayout {
        width: 3,
        sprite: 0,
        name: 1,
        role: 2,
    };

    pub const RANK_POPUP: RecordLayout = RecordLayout {
        width: 3,
        sprite: 0,
        name: 1,
        role: 2,
    };

    fn is_valid(&self) -> bool {
        self.width > 0 && self.sprite < self.width && self.name < self.width && self.role < self.width
    }
}

pub struct RecordView<'a, W> {
    slots: &'a [W],
    layout: RecordLayout,
}

impl<'a, W> RecordView<'a, W> {
    /// `None` when the slot count is not a whole number of records, i.e. the
    /// UI is not in the expected layout.
    pub fn new(slots: &'a [W], layout: RecordLayout) -> Option<Self> {
        if !layout.is_valid() || slots.len() % layout.width != 0 {
            return None;
        }
        Some(Self { slots, layout })
    }

    pub fn len(&self) -> usize {
        self.slots.len() / self.layout.width
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Record<'a, W>> {
        let start = index.checked_mul(self.layout.width)?;
        let slots = self.slots.get(start..start + self.layout.width)?;
        Some(Record {
            index,
            slots,
            layout: self.layout,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Record<'a, W>> + '_ {
        (0..self.len()).filter_map(move |index| self.get(index))
    }
}

pub struct Record<'a, W> {
    index: usize,
    slots: &'a [W],
    layout: RecordLayout,
}

impl<'a, W> Record<'a, W> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn sprite(&self) -> &'a W {
        &self.slots[self.layout.sprite]
    }

    pub fn name(&self) -> &'a W {
        &self.slots[self.layout.name]
    }

    pub fn role(&self) -> &'a W {
        &self.slots[self.layout.role]
    }
}

/// An open rank picker: its title widget and its option widgets.
pub struct RankPopup<'a, W> {
    pub title: &'a W,
    pub options: &'a [W],
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub member_layout: RecordLayout,
    pub popup_layout: RecordLayout,
    pub highlight_color: u32,
    pub excluded: Vec<ClanRank>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            member_layout: RecordLayout::MEMBER_LIST,
            popup_layout: RecordLayout::RANK_POPUP,
            highlight_color: 0xFF0000,
            excluded: ClanRank::UNASSIGNABLE.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// The member list was not in record layout; nothing was touched.
    pub skipped: bool,
    pub flagged: Vec<String>,
    /// Record index of the highlighted picker option.
    pub popup_option: Option<usize>,
}

pub struct RankReconciler {
    config: ReconcilerConfig,
    desired: Mutex<Arc<DesiredRankMap>>,
    rerun: AtomicBool,
}

impl RankReconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            desired: Mutex::new(Arc::new(DesiredRankMap::new())),
            rerun: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn desired(&self) -> Arc<DesiredRankMap> {
        Arc::clone(&self.desired.lock())
    }

    /// Replaces the desired ranks wholesale and asks for an immediate pass.
    pub fn replace_desired(&self, desired: DesiredRankMap) {
        debug!(members = desired.len(), "desired clan ranks replaced");
        *self.desired.lock() = Arc::new(desired);
        self.rerun.store(true, Ordering::SeqCst);
    }

    /// Set by [`replace_desired`](Self::replace_desired) and cleared by the
    /// next [`reconcile`](Self::reconcile). Hosts poll this on their redraw
    /// tick and run a pass immediately when it is set.
    pub fn needs_rerun(&self) -> bool {
        self.rerun.load(Ordering::SeqCst)
    }

    /// Highlights mismatched members and, when `popup` is open for one of
    /// them, the option for their desired rank. `live` holds the ranks the
    /// host reads from the role slots during this pass; nothing from earlier
    /// passes is reused.
    pub fn reconcile<W: RankWidget>(
        &self,
        members: &[W],
        live: &LiveRankMap,
        popup: Option<RankPopup<'_, W>>,
    ) -> ReconcileReport {
        self.rerun.store(false, Ordering::SeqCst);
        let desired = self.desired();

        let Some(view) = RecordView::new(members, self.config.member_layout) else {
            debug!(slots = members.len(), "member list not in record layout; skipping pass");
            return ReconcileReport {
                skipped: true,
                ..ReconcileReport::default()
            };
        };

        let mut report = ReconcileReport::default();
        let mut pending_labels: HashMap<CaseInsensitiveKey, &'static str> = HashMap::new();
        for record in view.iter() {
            let key = CaseInsensitiveKey::new(normalize_name(&record.name().text()));
            let Some(target) = desired.get(&key) else {
                continue;
            };
            if live.get(&key) == Some(target) || self.config.excluded.contains(&target) {
                continue;
            }

            record.name().set_text_color(self.config.highlight_color);
            trace!(member = %key, target = %target, "flagged rank mismatch");
            report.flagged.push(key.to_string());
            pending_labels.insert(key, target.label());
        }

        if let Some(popup) = popup {
            report.popup_option = self.flag_popup_option(popup, &pending_labels);
        }
        report
    }

    fn flag_popup_option<W: RankWidget>(
        &self,
        popup: RankPopup<'_, W>,
        pending_labels: &HashMap<CaseInsensitiveKey, &'static str>,
    ) -> Option<usize> {
        let title = strip_tags(&popup.title.text());
        let captures = POPUP_TITLE.captures(title.trim())?;
        let target = CaseInsensitiveKey::new(normalize_name(&captures[1]));
        let label = *pending_labels.get(&target)?;

        let options = RecordView::new(popup.options, self.config.popup_layout)?;
        let option = options
            .iter()
            .find(|record| strip_tags(&record.name().text()).trim() == label)?;
        option.name().set_text_color(self.config.highlight_color);
        Some(option.index())
    }
}
