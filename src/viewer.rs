use crate::domain::{ActiveLocationRecord, LiveMap};
use crate::subscriber::{Subscriber, Subscription};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// How agents are named on screen.
#[derive(Clone, Debug, Default)]
pub struct AgentLabels {
    own_agent_id: Option<String>,
    names: HashMap<String, String>,
}

impl AgentLabels {
    pub fn new(own_agent_id: Option<&str>, names: HashMap<String, String>) -> Self {
        AgentLabels {
            own_agent_id: own_agent_id.map(str::to_string),
            names,
        }
    }

    /// A configured display name wins, otherwise "You" for the viewing agent and "Agent" for everybody else.
    pub fn label_for(&self, agent_id: &str) -> &str {
        if let Some(name) = self.names.get(agent_id).filter(|name| !name.trim().is_empty()) {
            return name;
        }

        if self.own_agent_id.as_deref() == Some(agent_id) { "You" } else { "Agent" }
    }
}

/// Logs the live set as it changes. Stale records are only flagged, never removed.
pub fn watch_all(subscriber: &Subscriber, labels: AgentLabels, stale_after: Duration) -> Subscription {
    subscriber.subscribe_all(move |live| log_live_set(live, &labels, Utc::now().timestamp_millis(), stale_after))
}

pub fn watch_agent(subscriber: &Subscriber, agent_id: &str, labels: AgentLabels, stale_after: Duration) -> Subscription {
    let watched = agent_id.to_string();
    subscriber.subscribe_one(agent_id, move |record| match record {
        Some(record) => log_record(record, &labels, Utc::now().timestamp_millis(), stale_after),
        None => info!(agent_id = watched, "👀 {} ({}) is not live", labels.label_for(&watched), watched),
    })
}

fn log_live_set(live: &LiveMap, labels: &AgentLabels, now_ms: i64, stale_after: Duration) {
    info!("👀 {} agent(s) live", live.len());

    let mut records = live.values().collect::<Vec<_>>();
    records.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
    for record in records {
        log_record(record, labels, now_ms, stale_after);
    }
}

fn log_record(record: &ActiveLocationRecord, labels: &AgentLabels, now_ms: i64, stale_after: Duration) {
    let label = labels.label_for(&record.agent_id);
    let age = record.age(now_ms);
    if record.is_stale(now_ms, stale_after) {
        #[rustfmt::skip]
        warn!(agent_id = record.agent_id, showing_id = record.showing_id, "⚠️ {} last reported {}s ago, it may no longer be live", label, age.as_secs());
        return;
    }

    let location = record.location();
    info!(
        agent_id = record.agent_id,
        showing_id = record.showing_id,
        "📍 {} at ({:.5}, {:.5}), {}s ago",
        label,
        location.latitude,
        location.longitude,
        age.as_secs()
    );
}
