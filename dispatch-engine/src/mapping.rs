//! Per-processor payload projection.
//!
//! A processor's mappings rewrite a dispatch payload into a brand-new object:
//! only fields named by a mapping survive. Each operation extracts a source
//! value by path, optionally gates on an equality filter against the value's
//! string form, and writes either the extracted value or a configured
//! constant to a (possibly nested) destination path.

use std::collections::HashMap;
use std::sync::RwLock;

use dispatch_core::Dispatch;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::payload;

/// One ordered mapping rule for a processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingOperation {
    /// Dot-separated path into the source payload. Absent means the operation
    /// can only produce its `map_to` constant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Dot-separated destination path; intermediate objects are created as
    /// needed.
    pub destination: String,
    /// Equality filter against the extracted value's string form; on mismatch
    /// the operation writes nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Constant to write instead of the extracted value. Setting it also
    /// flips the write mode from overwrite to combine-into-list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_to: Option<Value>,
}

/// Applies per-processor mapping configurations, rebuilt wholesale on every
/// settings update.
#[derive(Default)]
pub struct MappingsEngine {
    inner: RwLock<HashMap<String, Vec<MappingOperation>>>,
}

impl MappingsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild(&self, mappings: HashMap<String, Vec<MappingOperation>>) {
        *self.inner.write().expect("mappings lock poisoned") = mappings;
    }

    /// Rewrites the dispatch payload for one processor. With no mappings
    /// configured the dispatch passes through unchanged; identity (id,
    /// creation time) is always preserved.
    pub fn map(&self, processor_id: &str, mut dispatch: Dispatch) -> Dispatch {
        let inner = self.inner.read().expect("mappings lock poisoned");
        if let Some(operations) = inner.get(processor_id) {
            let projected = project(operations, dispatch.payload());
            dispatch.replace_payload(projected);
        }
        dispatch
    }
}

/// Builds the projected document. Public so mappings can also be applied
/// directly to a payload document.
pub fn project(operations: &[MappingOperation], source: &Value) -> Value {
    let mut output = Map::new();
    for operation in operations {
        apply(operation, source, &mut output);
    }
    Value::Object(output)
}

fn apply(operation: &MappingOperation, source: &Value, output: &mut Map<String, Value>) {
    let extracted = operation
        .source
        .as_deref()
        .and_then(|path| payload::get_path(source, path));

    if let Some(filter) = &operation.filter {
        let form = extracted.and_then(payload::string_form);
        if form.as_deref() != Some(filter.as_str()) {
            return;
        }
    }

    let (value, combine) = match &operation.map_to {
        Some(constant) => (constant.clone(), true),
        None => match extracted {
            Some(found) => (found.clone(), false),
            None => return,
        },
    };

    let target = descend(output, &operation.destination);
    let (parent, leaf) = target;
    if combine {
        combine_into(parent, leaf, value);
    } else {
        parent.insert(leaf.to_string(), value);
    }
}

// Walks/creates nested objects along the destination path, returning the
// parent object and the leaf key. A non-object in the middle of the path is
// replaced by an object.
fn descend<'a>(output: &'a mut Map<String, Value>, destination: &'a str) -> (&'a mut Map<String, Value>, &'a str) {
    let mut keys = destination.split('.').peekable();
    let mut current = output;
    loop {
        let key = keys.next().unwrap_or_default();
        if keys.peek().is_none() {
            return (current, key);
        }
        let entry = current
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry.as_object_mut().expect("entry was just made an object");
    }
}

// Constant writes accumulate: an existing list gains the new value, an
// existing scalar becomes a two-element list, an empty slot takes the value
// as-is.
fn combine_into(parent: &mut Map<String, Value>, key: &str, value: Value) {
    match parent.get_mut(key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let previous = existing.take();
            *existing = Value::Array(vec![previous, value]);
        }
        None => {
            parent.insert(key.to_string(), value);
        }
    }
}
