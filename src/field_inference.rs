use crate::feature::Feature;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Classification of a feature property, either taken from the data
/// source's hints or inferred from the first non-null value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Quantitative,
    Qualitative,
    Boolean,
    Unknown,
}

/// Free-text annotations a user attaches to a field or attribute value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMeta {
    pub meaning: String,
    pub importance: String,
}

/// Value-frequency table for one qualitative field, seeding the
/// attribute-weight sliders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldAttributeTable {
    /// Distinct values sorted by descending occurrence, ties by first
    /// appearance in the feature sequence.
    pub unique_values: Vec<String>,
    pub value_counts: HashMap<String, u64>,
    /// Per-value weights on the [0, 100] scale.
    pub attribute_weights: HashMap<String, f64>,
    pub attribute_meta: HashMap<String, FieldMeta>,
}

fn is_finite_number(value: &Value) -> bool {
    value.as_f64().is_some_and(f64::is_finite)
}

fn infer_from_value(value: &Value) -> FieldType {
    match value {
        Value::Bool(_) => FieldType::Boolean,
        v if is_finite_number(v) => FieldType::Quantitative,
        _ => FieldType::Qualitative,
    }
}

/// Stringify a property value for attribute aggregation. Null and empty
/// strings are skipped entirely.
fn attribute_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Assign a type to every requested field. A hint from the data source
/// wins; otherwise the first non-null value decides; a field that is null
/// throughout stays Unknown.
pub fn infer_field_types(
    features: &[Feature],
    field_names: &[String],
    hints: &HashMap<String, FieldType>,
) -> HashMap<String, FieldType> {
    let mut types = HashMap::new();
    for field in field_names {
        if let Some(hint) = hints.get(field) {
            types.insert(field.clone(), *hint);
            continue;
        }
        let inferred = features
            .iter()
            .filter_map(|f| f.property(field))
            .find(|v| !v.is_null())
            .map(infer_from_value)
            .unwrap_or(FieldType::Unknown);
        types.insert(field.clone(), inferred);
    }
    types
}

/// Build the value-frequency table for a qualitative field and seed an
/// equal attribute-weight distribution.
pub fn aggregate_attributes(features: &[Feature], field: &str) -> FieldAttributeTable {
    let mut counts: HashMap<String, u64> = HashMap::new();
    let mut seen_order: Vec<String> = Vec::new();

    for feature in features {
        let Some(value) = feature.property(field) else {
            continue;
        };
        let Some(key) = attribute_key(value) else {
            continue;
        };
        if !counts.contains_key(&key) {
            seen_order.push(key.clone());
        }
        *counts.entry(key).or_insert(0) += 1;
    }

    // Stable sort keeps first-seen order among equal counts.
    let mut unique_values = seen_order;
    unique_values.sort_by(|a, b| counts[b].cmp(&counts[a]));

    let equal_share = if unique_values.is_empty() {
        0.0
    } else {
        100.0 / unique_values.len() as f64
    };
    let attribute_weights = unique_values
        .iter()
        .map(|v| (v.clone(), equal_share))
        .collect();
    let attribute_meta = unique_values
        .iter()
        .map(|v| (v.clone(), FieldMeta::default()))
        .collect();

    FieldAttributeTable {
        unique_values,
        value_counts: counts,
        attribute_weights,
        attribute_meta,
    }
}

/// Re-aggregate a field without losing user edits: weights and meta that
/// already exist survive, newly discovered values get the fresh defaults.
pub fn merge_attributes(existing: &FieldAttributeTable, features: &[Feature], field: &str) -> FieldAttributeTable {
    let mut fresh = aggregate_attributes(features, field);
    for value in &fresh.unique_values {
        if let Some(weight) = existing.attribute_weights.get(value) {
            fresh.attribute_weights.insert(value.clone(), *weight);
        }
        if let Some(meta) = existing.attribute_meta.get(value) {
            fresh.attribute_meta.insert(value.clone(), meta.clone());
        }
    }
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;
    use serde_json::json;

    fn features(props: &[Value]) -> Vec<Feature> {
        props
            .iter()
            .map(|p| {
                let Value::Object(map) = p.clone() else {
                    panic!("expected object")
                };
                Feature::from_properties(map)
            })
            .collect()
    }

    #[test]
    fn infers_quantitative_and_qualitative_from_first_values() {
        let feats = features(&[json!({"a": 1, "b": "x"}), json!({"a": 2, "b": "y"})]);
        let names = vec!["a".to_string(), "b".to_string()];
        let types = infer_field_types(&feats, &names, &HashMap::new());
        assert_eq!(types["a"], FieldType::Quantitative);
        assert_eq!(types["b"], FieldType::Qualitative);
    }

    #[test]
    fn hint_overrides_inference() {
        let feats = features(&[json!({"a": 1})]);
        let mut hints = HashMap::new();
        hints.insert("a".to_string(), FieldType::Qualitative);
        let types = infer_field_types(&feats, &["a".to_string()], &hints);
        assert_eq!(types["a"], FieldType::Qualitative);
    }

    #[test]
    fn null_throughout_is_unknown_and_boolean_detected() {
        let feats = features(&[json!({"n": null, "f": true}), json!({"n": null, "f": false})]);
        let names = vec!["n".to_string(), "f".to_string()];
        let types = infer_field_types(&feats, &names, &HashMap::new());
        assert_eq!(types["n"], FieldType::Unknown);
        assert_eq!(types["f"], FieldType::Boolean);
    }

    #[test]
    fn leading_null_is_skipped_for_inference() {
        let feats = features(&[json!({"a": null}), json!({"a": 3.5})]);
        let types = infer_field_types(&feats, &["a".to_string()], &HashMap::new());
        assert_eq!(types["a"], FieldType::Quantitative);
    }

    #[test]
    fn aggregates_counts_sorted_by_descending_occurrence() {
        let feats = features(&[
            json!({"b": "x"}),
            json!({"b": "y"}),
            json!({"b": "y"}),
            json!({"b": ""}),
            json!({"b": null}),
        ]);
        let table = aggregate_attributes(&feats, "b");
        assert_eq!(table.unique_values, vec!["y".to_string(), "x".to_string()]);
        assert_eq!(table.value_counts["y"], 2);
        assert_eq!(table.value_counts["x"], 1);
        assert_eq!(table.attribute_weights["x"], 50.0);
        assert_eq!(table.attribute_weights["y"], 50.0);
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let feats = features(&[json!({"b": "x"}), json!({"b": "y"})]);
        let table = aggregate_attributes(&feats, "b");
        assert_eq!(table.unique_values, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn numbers_and_booleans_are_stringified() {
        let feats = features(&[json!({"b": 7}), json!({"b": true})]);
        let table = aggregate_attributes(&feats, "b");
        assert!(table.value_counts.contains_key("7"));
        assert!(table.value_counts.contains_key("true"));
    }

    #[test]
    fn merge_preserves_user_edits_and_defaults_new_values() {
        let feats = features(&[json!({"b": "x"}), json!({"b": "y"})]);
        let mut table = aggregate_attributes(&feats, "b");
        table.attribute_weights.insert("x".to_string(), 80.0);
        table.attribute_meta.insert(
            "x".to_string(),
            FieldMeta {
                meaning: "primary".to_string(),
                importance: "high".to_string(),
            },
        );

        let more = features(&[
            json!({"b": "x"}),
            json!({"b": "y"}),
            json!({"b": "z"}),
        ]);
        let merged = merge_attributes(&table, &more, "b");
        assert_eq!(merged.attribute_weights["x"], 80.0);
        assert_eq!(merged.attribute_meta["x"].meaning, "primary");
        // New value gets the fresh equal share over three values.
        assert!((merged.attribute_weights["z"] - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn inference_is_order_independent_across_feature_order() {
        let forward = features(&[json!({"a": 1, "b": "x"}), json!({"a": 2, "b": "y"})]);
        let reversed: Vec<Feature> = forward.iter().rev().cloned().collect();
        let names = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            infer_field_types(&forward, &names, &HashMap::new()),
            infer_field_types(&reversed, &names, &HashMap::new())
        );
    }
}
