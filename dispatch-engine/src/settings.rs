//! The live, hot-swappable pipeline configuration. The orchestrator observes
//! a `watch` of this struct and re-applies it wholesale on every change.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::barriers::BarrierScope;
use crate::mapping::MappingOperation;
use crate::rules::Rule;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Cap on distinct queued events across all processors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<i64>,
    /// Queue entry expiry, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_seconds: Option<u64>,
    /// Shared, named rule table referenced from `load_rules`.
    #[serde(default)]
    pub rules: HashMap<String, Rule>,
    /// Rule assignment per processor or collector id.
    #[serde(default)]
    pub load_rules: HashMap<String, Rule>,
    /// Ordered mapping operations per processor id.
    #[serde(default)]
    pub mappings: HashMap<String, Vec<MappingOperation>>,
    /// Scope overrides for registered barriers, by barrier id. Barriers not
    /// named here keep their registration-time scopes.
    #[serde(default)]
    pub barrier_scopes: HashMap<String, Vec<BarrierScope>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_deserialize_from_a_settings_document() {
        let settings: DispatchSettings = serde_json::from_value(json!({
            "max_queue_size": 250,
            "expiry_seconds": 3600,
            "rules": {
                "is_view": {"variable": "event_type", "operator": "equals", "filter": "view"}
            },
            "load_rules": {"analytics": "is_view"},
            "mappings": {
                "analytics": [{"source": "a", "destination": "b"}]
            },
            "barrier_scopes": {"offline": [{"processor": "analytics"}]}
        }))
        .unwrap();

        assert_eq!(settings.max_queue_size, Some(250));
        assert_eq!(settings.expiry_seconds, Some(3600));
        assert!(settings.rules.contains_key("is_view"));
        assert_eq!(settings.mappings["analytics"].len(), 1);
        assert_eq!(
            settings.barrier_scopes["offline"],
            vec![BarrierScope::Processor("analytics".to_string())]
        );
    }

    #[test]
    fn empty_settings_are_all_defaults() {
        let settings: DispatchSettings = serde_json::from_value(json!({})).unwrap();
        assert_eq!(settings, DispatchSettings::default());
    }
}
