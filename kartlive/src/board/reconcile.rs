//! Snapshot reconciliation
//!
//! `reconcile` compares a freshly fetched snapshot against the one before
//! it and produces the rows a display renders: normalized times, derived
//! gap and average, a `changed` flag and the direction of any position
//! move. Rows that changed carry a deadline after which their highlight
//! must be dropped.
//!
//! Reconciliation never fails. Fields that cannot be interpreted are left
//! empty and their names are listed in `AnnotatedRow::malformed`.

use super::snapshot::{RacerId, RawScoreRow, Snapshot};
use crate::timing::{self, RaceTime, RawTime};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_HIGHLIGHT_WINDOW: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionDelta {
    Improved,
    Dropped,
    #[default]
    Unchanged,
}

/// Distance to the leader.
#[derive(Debug, Clone, PartialEq)]
pub enum Gap {
    Leader,
    Time(RaceTime),
    /// Laps-down marker as sent by upstream, e.g. `"+1L"`.
    Laps(String),
    Unknown,
}

impl Gap {
    pub fn display(&self) -> String {
        match self {
            Gap::Time(t) => timing::format_gap(Some(t)),
            Gap::Laps(text) => text.clone(),
            Gap::Leader | Gap::Unknown => timing::PLACEHOLDER.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedRow {
    pub row: RawScoreRow,
    pub last_lap: Option<RaceTime>,
    pub best_lap: Option<RaceTime>,
    pub total_time: Option<RaceTime>,
    pub average_lap: Option<RaceTime>,
    pub gap: Gap,
    pub changed: bool,
    pub position_delta: PositionDelta,
    pub previous_position: Option<u32>,
    pub highlight_expires_at: Option<Instant>,
    /// Upstream fields that were present but could not be interpreted.
    pub malformed: Vec<&'static str>,
}

impl AnnotatedRow {
    pub fn id(&self) -> &RacerId {
        &self.row.guest_id
    }

    pub fn position(&self) -> Option<u32> {
        self.row.position
    }

    pub fn display_name(&self) -> String {
        self.row.display_name()
    }

    pub fn is_rookie(&self) -> bool {
        self.row.is_first_time == Some(true) || self.row.total_races == Some(0)
    }

    pub fn is_highlighted(&self, now: Instant) -> bool {
        match self.highlight_expires_at {
            Some(at) => now < at,
            None => false,
        }
    }

    pub fn clear_highlight(&mut self) {
        self.highlight_expires_at = None;
        self.position_delta = PositionDelta::Unchanged;
    }
}

fn same_time(a: Option<&RaceTime>, b: Option<&RaceTime>) -> bool {
    a.map(|t| t.ms) == b.map(|t| t.ms)
}

fn is_changed(row: &RawScoreRow, prev: &RawScoreRow) -> bool {
    row.lap_num != prev.lap_num
        || row.position != prev.position
        || !same_time(
            timing::normalize(row.amb_time.as_ref()).as_ref(),
            timing::normalize(prev.amb_time.as_ref()).as_ref(),
        )
        || !same_time(
            timing::normalize(row.fastest_lap_time.as_ref()).as_ref(),
            timing::normalize(prev.fastest_lap_time.as_ref()).as_ref(),
        )
}

fn position_delta(now: Option<u32>, before: Option<u32>) -> PositionDelta {
    match (now, before) {
        (Some(now), Some(before)) => match now.cmp(&before) {
            Ordering::Less => PositionDelta::Improved,
            Ordering::Greater => PositionDelta::Dropped,
            Ordering::Equal => PositionDelta::Unchanged,
        },
        _ => PositionDelta::Unchanged,
    }
}

/// Normalizes one field, noting it as malformed if a value was present
/// but unusable.
fn field(
    raw: Option<&RawTime>,
    name: &'static str,
    malformed: &mut Vec<&'static str>,
) -> Option<RaceTime> {
    let time = timing::normalize(raw);
    if time.is_none() {
        if let Some(raw) = raw {
            if !timing::is_placeholder(raw) {
                malformed.push(name);
            }
        }
    }
    time
}

fn by_position(a: &AnnotatedRow, b: &AnnotatedRow) -> Ordering {
    let (pa, pb) = (a.position(), b.position());
    pa.is_none()
        .cmp(&pb.is_none())
        .then(pa.cmp(&pb))
        .then_with(|| a.id().cmp(b.id()))
}

/// Annotates `current` against `previous` and returns the rows ordered by
/// position. Rows without a position go last; equal positions are ordered
/// by racer id.
pub fn reconcile(
    current: &Snapshot,
    previous: Option<&Snapshot>,
    now: Instant,
    window: Duration,
) -> Vec<AnnotatedRow> {
    let mut before: HashMap<&RacerId, &RawScoreRow> = HashMap::new();
    if let Some(previous) = previous {
        for row in &previous.rows {
            before.entry(&row.guest_id).or_insert(row);
        }
    }

    let leader_total = current
        .rows
        .iter()
        .find(|r| r.position == Some(1))
        .and_then(|r| timing::normalize(r.amb_time.as_ref()));

    let mut rows: Vec<AnnotatedRow> = current
        .rows
        .iter()
        .map(|row| {
            let prev = before.get(&row.guest_id).copied();
            let mut malformed = Vec::new();
            let last_lap = field(row.last_lap_time.as_ref(), "lastLapTime", &mut malformed);
            let best_lap = field(row.fastest_lap_time.as_ref(), "fastestLapTime", &mut malformed);
            let total_time = field(row.amb_time.as_ref(), "ambTime", &mut malformed);

            let average_lap = field(
                row.average_lap_time.as_ref(),
                "averageLapTime",
                &mut malformed,
            )
            .or_else(|| total_time.and_then(|t| t.per(row.lap_num.unwrap_or(0))));

            let gap = if row.position == Some(1) {
                Gap::Leader
            } else {
                match &row.gap {
                    Some(RawTime::Text(text)) if text.contains('L') => {
                        Gap::Laps(text.trim().to_string())
                    }
                    upstream => match field(upstream.as_ref(), "gap", &mut malformed) {
                        Some(t) => Gap::Time(t),
                        None => match (total_time, leader_total) {
                            (Some(total), Some(leader)) if total.ms > leader.ms => {
                                Gap::Time(total.since(&leader))
                            }
                            _ => Gap::Unknown,
                        },
                    },
                }
            };

            let changed = match prev {
                Some(prev) => is_changed(row, prev),
                None => true,
            };
            let previous_position = prev.and_then(|p| p.position);
            let delta = match prev {
                Some(_) => position_delta(row.position, previous_position),
                None => PositionDelta::Unchanged,
            };
            let highlight_expires_at = if changed || delta != PositionDelta::Unchanged {
                Some(now + window)
            } else {
                None
            };

            AnnotatedRow {
                row: row.clone(),
                last_lap,
                best_lap,
                total_time,
                average_lap,
                gap,
                changed,
                position_delta: delta,
                previous_position,
                highlight_expires_at,
                malformed,
            }
        })
        .collect();

    rows.sort_by(by_position);
    rows
}
