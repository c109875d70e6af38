//! Push messages and the change events decoded from them.
//!
//! This module provides the data types and pure functions that the hub
//! transport, the push channel, and the stores share. No network I/O
//! occurs here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::Record;

/// A named message as delivered by a hub.
///
/// Event names are free-form: the server can introduce new ones without a
/// client-side registry. `arguments` is the raw JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct HubMessage {
    /// Event name (e.g. `"ContractChanged"`).
    pub target: String,
    /// Raw payload.
    pub arguments: Value,
}

impl HubMessage {
    /// Build a message.
    pub fn new(target: impl Into<String>, arguments: Value) -> Self {
        Self {
            target: target.into(),
            arguments,
        }
    }
}

/// Mutation kind carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl ChangeAction {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "create" | "created" => Some(Self::Create),
            "update" | "updated" => Some(Self::Update),
            "delete" | "deleted" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A change to one record, pushed by the server.
///
/// Push events are applied with the same fold rules as the store's own
/// mutations. They carry no version or idempotence key: a push event and a
/// local mutation for the same record are applied in arrival order, and
/// the last shallow merge wins.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    /// What happened.
    pub action: ChangeAction,
    /// The affected record. For deletes only the id is meaningful.
    pub data: Record,
}

/// Decode a [`HubMessage`] into a [`PushEvent`].
///
/// Accepts `{action, data}` directly or as the first element of an
/// arguments array. For deletes, `data` may be a bare id string or number.
/// Returns `None` for anything else; unknown payloads are skipped rather
/// than treated as errors.
///
/// # Arguments
///
/// * `message` - A message received from a hub.
///
/// # Returns
///
/// `Some(PushEvent)` if the payload has a known action and a record with
/// an id, `None` otherwise.
pub fn decode_push_event(message: &HubMessage) -> Option<PushEvent> {
    let payload = match &message.arguments {
        Value::Array(args) => args.first()?,
        other => other,
    };
    let obj = payload.as_object()?;
    let action = ChangeAction::parse(obj.get("action")?.as_str()?)?;

    let data = match obj.get("data")? {
        Value::String(id) if action == ChangeAction::Delete && !id.is_empty() => {
            Record::new(id.clone(), serde_json::Map::new())
        }
        Value::Number(id) if action == ChangeAction::Delete => {
            Record::new(id.to_string(), serde_json::Map::new())
        }
        value => Record::from_value(value.clone()).ok()?,
    };

    Some(PushEvent { action, data })
}
