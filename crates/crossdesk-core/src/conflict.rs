//! Overlap detection across a merged event list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::CanonicalEvent;
use crate::provider::Provider;
use crate::time::parse_timestamp;

/// The projection of an event reported in a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: String,
    pub title: String,
    pub start: String,
    pub end: String,
    pub provider: Provider,
}

impl From<&CanonicalEvent> for EventSummary {
    fn from(event: &CanonicalEvent) -> Self {
        Self {
            id: event.id.clone(),
            title: event.title.clone(),
            start: event.start.clone(),
            end: event.end.clone(),
            provider: event.provider,
        }
    }
}

/// Two events whose time ranges overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPair {
    pub event_1: EventSummary,
    pub event_2: EventSummary,
}

/// Every conflicting pair plus the count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub conflicts: Vec<ConflictPair>,
    pub total: usize,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }
}

struct Timed<'a> {
    event: &'a CanonicalEvent,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// Finds every pair of timed events whose half-open ranges overlap.
///
/// All-day events and events without a parseable start and end are ignored.
/// Pairs are reported once, in input order: `event_1` always precedes
/// `event_2` in `events`. Ranges that only share a boundary do not conflict.
pub fn detect_conflicts(events: &[CanonicalEvent]) -> ConflictReport {
    let timed: Vec<Timed<'_>> = events
        .iter()
        .filter(|e| !e.is_all_day && e.has_time_range())
        .filter_map(|event| {
            let start = parse_timestamp(&event.start)?;
            let end = parse_timestamp(&event.end)?;
            Some(Timed { event, start, end })
        })
        .collect();

    let mut conflicts = Vec::new();
    for (i, a) in timed.iter().enumerate() {
        for b in &timed[i + 1..] {
            if a.start < b.end && b.start < a.end {
                conflicts.push(ConflictPair {
                    event_1: EventSummary::from(a.event),
                    event_2: EventSummary::from(b.event),
                });
            }
        }
    }

    let total = conflicts.len();
    ConflictReport { conflicts, total }
}
