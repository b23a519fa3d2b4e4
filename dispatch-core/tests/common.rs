use std::collections::HashSet;

use chrono::{Duration, Utc};
use dispatch_core::{keys, Dispatch, DispatchType};
use serde_json::json;
use uuid::Uuid;

#[allow(dead_code)]
pub fn dispatch(name: &str) -> Dispatch {
    Dispatch::new(name, DispatchType::Event, json!({}))
}

/// A dispatch whose creation timestamp lies `age` in the past. Distinct ages
/// give a deterministic chronological order, which `Dispatch::new` cannot
/// (two calls can land in the same millisecond).
#[allow(dead_code)]
pub fn dispatch_aged(name: &str, age: Duration) -> Dispatch {
    let id = Uuid::new_v4();
    let created = Utc::now() - age;
    let payload = json!({
        keys::EVENT_NAME: name,
        keys::EVENT_TYPE: "event",
        keys::DISPATCH_ID: id.to_string(),
        keys::TIMESTAMP_MS: created.timestamp_millis(),
    });
    Dispatch::restore(id, created, payload)
}

#[allow(dead_code)]
pub fn processors(ids: &[&str]) -> HashSet<String> {
    ids.iter().map(|id| (*id).to_string()).collect()
}

#[allow(dead_code)]
pub fn names(dispatches: &[Dispatch]) -> Vec<&str> {
    dispatches.iter().map(|d| d.name().unwrap()).collect()
}
