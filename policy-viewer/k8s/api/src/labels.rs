use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cilium security labels keyed by `source:key`.
pub type Map = BTreeMap<String, String>;

/// An endpoint selector as it appears in Cilium policy rules.
#[derive(Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub match_labels: Map,
}

impl Selector {
    pub fn from_map(match_labels: Map) -> Self {
        Self { match_labels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn selector_json() {
        let sel = Selector::from_map(btreemap! {
            "k8s:app".to_string() => "web".to_string(),
        });
        assert_eq!(
            serde_json::to_value(&sel).unwrap(),
            serde_json::json!({ "matchLabels": { "k8s:app": "web" } })
        );
        assert_eq!(
            serde_json::to_value(Selector::default()).unwrap(),
            serde_json::json!({})
        );
        let parsed = serde_json::from_str::<Selector>("{}").unwrap();
        assert_eq!(parsed, Selector::default());
    }
}
