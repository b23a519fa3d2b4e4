use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Well-known payload keys injected when a dispatch is created.
pub mod keys {
    /// The name of the event being tracked.
    pub const EVENT_NAME: &str = "event_name";

    /// The type of the event being tracked, e.g. "event" or "view".
    pub const EVENT_TYPE: &str = "event_type";

    /// The unique id of the dispatch, mirrored into the payload.
    pub const DISPATCH_ID: &str = "dispatch_id";

    /// Creation time, unix epoch milliseconds.
    pub const TIMESTAMP_MS: &str = "timestamp_ms";
}

/// The type tag of a [`Dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchType {
    Event,
    View,
}

impl DispatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchType::Event => "event",
            DispatchType::View => "view",
        }
    }
}

impl fmt::Display for DispatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(DispatchType::Event),
            "view" => Ok(DispatchType::View),
            _ => Err(()),
        }
    }
}

/// A single tracked event moving through the pipeline.
///
/// The id and creation timestamp are fixed at submission time and survive any
/// number of payload replacements; queue identity is by id alone. The payload
/// is a JSON object and is only ever swapped wholesale (transformations,
/// mappings) or extended via [`Dispatch::merge`] (collection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    id: Uuid,
    created: DateTime<Utc>,
    payload: Value,
}

impl Dispatch {
    /// Creates a new dispatch, stamping the well-known keys into the payload.
    pub fn new(name: &str, dispatch_type: DispatchType, data: Value) -> Self {
        let id = Uuid::new_v4();
        let created = Utc::now();

        let mut payload = json!({
            keys::EVENT_NAME: name,
            keys::EVENT_TYPE: dispatch_type.as_str(),
            keys::DISPATCH_ID: id.to_string(),
            keys::TIMESTAMP_MS: created.timestamp_millis(),
        });
        if let (Some(target), Some(extra)) = (payload.as_object_mut(), data.as_object()) {
            for (k, v) in extra {
                target.insert(k.clone(), v.clone());
            }
        }

        Self {
            id,
            created,
            payload,
        }
    }

    /// Recreates a dispatch from storage. The well-known keys are expected to
    /// already be present in the payload.
    pub fn restore(id: Uuid, created: DateTime<Utc>, payload: Value) -> Self {
        Self {
            id,
            created,
            payload,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The event name, if still present in the payload.
    pub fn name(&self) -> Option<&str> {
        self.payload.get(keys::EVENT_NAME)?.as_str()
    }

    /// The event type, if still present in the payload.
    pub fn dispatch_type(&self) -> Option<DispatchType> {
        self.payload
            .get(keys::EVENT_TYPE)?
            .as_str()?
            .parse()
            .ok()
    }

    /// Replaces the payload wholesale. Identity (id, created) is untouched.
    pub fn replace_payload(&mut self, payload: Value) {
        self.payload = payload;
    }

    /// Shallow-merges `data` into the payload, overwriting existing keys.
    pub fn merge(&mut self, data: Value) {
        let Some(extra) = data.as_object() else {
            return;
        };
        if !self.payload.is_object() {
            self.payload = Value::Object(Map::new());
        }
        let target = self
            .payload
            .as_object_mut()
            .expect("payload was just made an object");
        for (k, v) in extra {
            target.insert(k.clone(), v.clone());
        }
    }

    /// A short, stable description for log lines.
    pub fn log_description(&self) -> String {
        let id = self.id.to_string();
        format!("{}-{}", &id[..5], self.name().unwrap_or("unnamed"))
    }
}

// Queue identity is by id: the payload may be rewritten per processor without
// the dispatch becoming a different queue entry.
impl PartialEq for Dispatch {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Dispatch {}

impl std::hash::Hash for Dispatch {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Converts a stored epoch-milliseconds value back to a timestamp, clamping
/// out-of-range values to the epoch.
pub fn timestamp_from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).single().unwrap_or_default())
}
