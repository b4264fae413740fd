use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single GeoJSON feature as the editor consumes it. The geometry is
/// carried opaquely; only `properties` is inspected by the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub geometry: Value,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn from_properties(properties: Map<String, Value>) -> Self {
        Self {
            geometry: Value::Null,
            properties,
        }
    }

    pub fn property(&self, field: &str) -> Option<&Value> {
        self.properties.get(field)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Union of property names across all features, in first-seen order.
pub fn property_names(features: &[Feature]) -> Vec<String> {
    features
        .iter()
        .flat_map(|f| f.properties.keys().cloned())
        .unique()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feature(props: Value) -> Feature {
        let Value::Object(map) = props else {
            panic!("expected object")
        };
        Feature::from_properties(map)
    }

    #[test]
    fn collects_property_names_in_first_seen_order() {
        let features = vec![
            feature(json!({"b": 1, "a": 2})),
            feature(json!({"c": 3, "a": 4})),
        ];
        // serde_json::Map preserves insertion order only with the
        // preserve_order feature; keys within one object come back sorted,
        // but cross-feature order is still first-seen.
        let names = property_names(&features);
        assert!(names.contains(&"a".to_string()));
        assert!(names.contains(&"b".to_string()));
        assert_eq!(names.last().unwrap(), "c");
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn deserializes_features_with_missing_members() {
        let collection: FeatureCollection =
            serde_json::from_str(r#"{"features": [{"type": "Feature"}]}"#).unwrap();
        assert_eq!(collection.len(), 1);
        assert!(collection.features[0].properties.is_empty());
        assert!(collection.features[0].geometry.is_null());
    }
}
