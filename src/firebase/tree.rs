use crate::domain::{ActiveLocationRecord, LiveMap};
use crate::sse::ServerSentEvent;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct PathData {
    path: String,
    data: Value,
}

/// Mirror of the `active_showings` subtree, kept up to date from the streaming events.
#[derive(Debug, Default)]
pub struct LiveTree {
    root: Value,
    synced: bool,
}

impl LiveTree {
    /// Applies a single event. Returns `true` when the live set may have changed.
    pub fn apply(&mut self, event: &ServerSentEvent<Value>) -> Result<bool, TreeError> {
        let kind = event.event.as_deref().unwrap_or("");
        match kind {
            "put" => {
                let PathData { path, data } = Self::path_data(event)?;
                set_at(&mut self.root, &segments(&path), data);
                self.synced = true;
                Ok(true)
            }
            "patch" => {
                let PathData { path, data } = Self::path_data(event)?;
                let Value::Object(children) = data else {
                    return Err(TreeError::InvalidPatch(path));
                };

                let base = segments(&path);
                for (key, value) in children {
                    let mut child_path = base.clone();
                    child_path.push(key.as_str());
                    set_at(&mut self.root, &child_path, value);
                }
                Ok(true)
            }
            "keep-alive" => Ok(false),
            "cancel" => Err(TreeError::Cancelled(event.data.as_ref().map(Value::to_string).unwrap_or_default())),
            "auth_revoked" => Err(TreeError::AuthRevoked),
            other => {
                warn!("⚠️ Ignoring unknown event '{}'", other);
                Ok(false)
            }
        }
    }

    /// Whether the initial state has been received since the tree was created.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Converts the tree into the live set, skipping children that are not valid records.
    pub fn live_map(&self) -> LiveMap {
        let Value::Object(children) = &self.root else {
            return LiveMap::new();
        };

        children
            .iter()
            .filter_map(|(agent_id, value)| match serde_json::from_value::<ActiveLocationRecord>(value.clone()) {
                Ok(record) => Some((agent_id.clone(), record)),
                Err(e) => {
                    warn!(agent_id, "⚠️ Skipping malformed record: {}", e);
                    None
                }
            })
            .collect()
    }

    fn path_data(event: &ServerSentEvent<Value>) -> Result<PathData, TreeError> {
        let data = event.data.clone().ok_or(TreeError::MissingData)?;
        Ok(serde_json::from_value(data)?)
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

// Nulls delete, and emptied objects disappear along with them
fn set_at(node: &mut Value, path: &[&str], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }

    if let Value::Object(children) = node {
        let remove = {
            let child = children.entry(head.to_string()).or_insert(Value::Null);
            set_at(child, rest, value);
            is_empty(child)
        };

        if remove {
            children.remove(*head);
        }
    }

    if is_empty(node) {
        *node = Value::Null;
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(children) => children.is_empty(),
        _ => false,
    }
}

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("event carries no data")]
    MissingData,
    #[error("invalid event payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("patch at '{0}' does not carry an object")]
    InvalidPatch(String),
    #[error("stream was cancelled by the server: {0}")]
    Cancelled(String),
    #[error("stream credentials were revoked")]
    AuthRevoked,
}
