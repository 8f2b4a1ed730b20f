//! Diff a fresh feed snapshot against the events stored for one
//! `(user, provider)` pair.
//!
//! The feed is authoritative: anything stored but absent from the snapshot is
//! deleted, so applying a plan leaves the stored set equal to the snapshot.

use std::collections::HashMap;

use serde::Serialize;

use crate::db::models::{CalendarEvent, StoredEvent};

#[derive(Debug, Default)]
pub struct SyncPlan {
    pub inserts: Vec<CalendarEvent>,
    /// `(stored row id, new contents)`
    pub updates: Vec<(String, CalendarEvent)>,
    /// Stored row ids to remove.
    pub deletes: Vec<String>,
    /// Number of distinct incoming events the plan was built from.
    pub processed: usize,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Aggregate outcome of one sync. Partial failures show up in `errors`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub processed: usize,
    pub new: usize,
    pub updated: usize,
    pub deleted: usize,
    pub errors: usize,
    pub date_fallbacks: usize,
}

/// Times substituted for broken feed dates change on every run, so they are
/// not compared.
fn differs(stored: &StoredEvent, incoming: &CalendarEvent) -> bool {
    if incoming.date_fallback {
        return stored.title != incoming.title;
    }
    stored.title != incoming.title
        || stored.start_time != incoming.start_time.naive_utc()
        || stored.end_time != incoming.end_time.naive_utc()
}

/// Build the insert/update/delete sets.
///
/// Incoming events sharing a `source_event_id` collapse to the last one seen.
/// Stored rows sharing a key beyond the first are scheduled for deletion.
pub fn plan(incoming: Vec<CalendarEvent>, stored: &[StoredEvent]) -> SyncPlan {
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, CalendarEvent> = HashMap::new();
    for event in incoming {
        let key = event.source_event_id.clone();
        if latest.insert(key.clone(), event).is_none() {
            order.push(key);
        }
    }

    let mut deletes = Vec::new();
    let mut existing: HashMap<&str, &StoredEvent> = HashMap::new();
    for row in stored {
        if existing.contains_key(row.source_event_id.as_str()) {
            deletes.push(row.id.clone());
        } else {
            existing.insert(row.source_event_id.as_str(), row);
        }
    }

    let mut plan = SyncPlan {
        processed: order.len(),
        ..Default::default()
    };

    for key in order {
        let Some(event) = latest.remove(&key) else {
            continue;
        };
        match existing.remove(key.as_str()) {
            None => plan.inserts.push(event),
            Some(row) if differs(row, &event) => plan.updates.push((row.id.clone(), event)),
            Some(_) => {}
        }
    }

    // Whatever is still in `existing` was not in the snapshot.
    let mut leftovers: Vec<String> = existing.into_values().map(|row| row.id.clone()).collect();
    leftovers.sort();
    deletes.extend(leftovers);
    plan.deletes = deletes;

    plan
}
