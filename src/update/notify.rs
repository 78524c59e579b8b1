use super::directive::UpdateDirective;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const UPDATE_METHOD: &str = "update";

/// One consolidated notification per committed batch.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub method: &'static str,
    pub request_id: Uuid,
    pub committed_at: DateTime<Utc>,
    /// Committed directives grouped by record type.
    pub changes: BTreeMap<String, Vec<UpdateDirective>>,
}

impl ChangeEvent {
    /// Groups the primary batch and every related batch by type.
    ///
    /// Related updates on the primary type are appended to the primary list
    /// rather than producing a second entry for the same key.
    pub fn consolidate(
        request_id: Uuid,
        primary_type: &str,
        primary: Vec<UpdateDirective>,
        related: BTreeMap<String, Vec<UpdateDirective>>,
    ) -> Self {
        let mut changes = BTreeMap::new();
        changes.insert(primary_type.to_string(), primary);
        for (record_type, updates) in related {
            if updates.is_empty() {
                continue;
            }
            changes.entry(record_type).or_insert_with(Vec::new).extend(updates);
        }

        Self {
            method: UPDATE_METHOD,
            request_id,
            committed_at: Utc::now(),
            changes,
        }
    }

    pub fn updates_for(&self, record_type: &str) -> &[UpdateDirective] {
        self.changes
            .get(record_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Fan-out of change events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Publishes `event`; returns how many subscribers received it.
    pub fn emit(&self, event: ChangeEvent) -> usize {
        // No subscribers is not an error.
        self.sender.send(event).unwrap_or(0)
    }
}
