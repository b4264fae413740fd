use crate::{
    error::EditorError,
    feature::Feature,
    field_inference::{FieldAttributeTable, FieldMeta, FieldType},
    weights::{WeightEngine, WeightScale},
};
use chrono::Utc;
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

lazy_static! {
    static ref PROJECT_ID_RE: Regex =
        Regex::new(r"^proj_\d+_[0-9a-z]{9}$").expect("project id regex");
}

/// Tolerance bands for the soft weight-sum checks. Violations are
/// warnings, not hard failures; the UI colors the total red.
pub const FIELD_WEIGHT_SUM_TOLERANCE: f64 = 0.001;
pub const ATTRIBUTE_WEIGHT_SUM_TOLERANCE: f64 = 5.0;
pub const REFERENCE_WEIGHT_SUM_TOLERANCE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
    Dataset,
    Category,
    #[serde(rename = "featurelayer")]
    FeatureLayer,
}

impl ProjectKind {
    pub fn label(self) -> &'static str {
        match self {
            ProjectKind::Dataset => "dataset",
            ProjectKind::Category => "category",
            ProjectKind::FeatureLayer => "featurelayer",
        }
    }
}

/// Generate a `proj_<ms-epoch>_<9-char-base36>` id.
pub fn generate_project_id() -> String {
    let ms = Utc::now().timestamp_millis();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| {
            let n = rng.gen_range(0..36u32);
            char::from_digit(n, 36).expect("base36 digit")
        })
        .collect();
    format!("proj_{ms}_{suffix}")
}

pub fn is_valid_project_id(id: &str) -> bool {
    PROJECT_ID_RE.is_match(id)
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339()
}

/// Leaf entity: raw GeoJSON features plus the per-field selection,
/// typing, weighting and annotation state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
    pub features: Vec<Feature>,
    pub field_types: HashMap<String, FieldType>,
    /// Ordered, duplicate-free; always the domain of `field_weights`.
    pub selected_fields: Vec<String>,
    /// Weights on the [0, 1] scale.
    pub field_weights: HashMap<String, f64>,
    pub field_meta: HashMap<String, FieldMeta>,
    /// Only qualitative fields get an entry.
    pub field_attributes: HashMap<String, FieldAttributeTable>,
}

/// References an ordered multi-set of Datasets with a [0, 100] weight
/// vector, plus the field-level maps used when the category is flattened
/// for export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
    pub datasets: Vec<String>,
    pub dataset_weights: HashMap<String, f64>,
    pub field_types: HashMap<String, FieldType>,
    pub selected_fields: Vec<String>,
    pub field_weights: HashMap<String, f64>,
    pub field_meta: HashMap<String, FieldMeta>,
    pub field_attributes: HashMap<String, FieldAttributeTable>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureLayer {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
    pub categories: Vec<String>,
    pub category_weights: HashMap<String, f64>,
    pub field_types: HashMap<String, FieldType>,
    pub selected_fields: Vec<String>,
    pub field_weights: HashMap<String, f64>,
    pub field_meta: HashMap<String, FieldMeta>,
    pub field_attributes: HashMap<String, FieldAttributeTable>,
}

pub fn new_dataset(name: &str) -> Dataset {
    let now = now_iso8601();
    Dataset {
        id: generate_project_id(),
        name: name.to_string(),
        created_at: now.clone(),
        updated_at: now,
        ..Dataset::default()
    }
}

pub fn new_category(name: &str) -> Category {
    let now = now_iso8601();
    Category {
        id: generate_project_id(),
        name: name.to_string(),
        created_at: now.clone(),
        updated_at: now,
        ..Category::default()
    }
}

pub fn new_feature_layer(name: &str) -> FeatureLayer {
    let now = now_iso8601();
    FeatureLayer {
        id: generate_project_id(),
        name: name.to_string(),
        created_at: now.clone(),
        updated_at: now,
        ..FeatureLayer::default()
    }
}

/// Any one of the three entity kinds; the strict Dataset ← Category ←
/// FeatureLayer DAG means this enum never nests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Project {
    Dataset(Dataset),
    Category(Category),
    #[serde(rename = "featurelayer")]
    FeatureLayer(FeatureLayer),
}

impl Project {
    pub fn id(&self) -> &str {
        match self {
            Project::Dataset(d) => &d.id,
            Project::Category(c) => &c.id,
            Project::FeatureLayer(f) => &f.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Project::Dataset(d) => &d.name,
            Project::Category(c) => &c.name,
            Project::FeatureLayer(f) => &f.name,
        }
    }

    pub fn kind(&self) -> ProjectKind {
        match self {
            Project::Dataset(_) => ProjectKind::Dataset,
            Project::Category(_) => ProjectKind::Category,
            Project::FeatureLayer(_) => ProjectKind::FeatureLayer,
        }
    }
}

fn renormalized(weights: &HashMap<String, f64>, keys: &[String]) -> HashMap<String, f64> {
    let mut engine = WeightEngine::from_weights(WeightScale::Percent, keys, weights);
    engine.renormalize();
    engine.weights().clone()
}

impl Dataset {
    pub fn touch(&mut self) {
        self.updated_at = now_iso8601();
    }
}

impl Category {
    pub fn touch(&mut self) {
        self.updated_at = now_iso8601();
    }

    /// Add a Dataset reference; duplicates are ignored. The new entry
    /// starts at the equal share of the enlarged set.
    pub fn add_dataset(&mut self, id: &str) {
        if self.datasets.iter().any(|d| d == id) {
            return;
        }
        self.datasets.push(id.to_string());
        let share = 100.0 / self.datasets.len() as f64;
        self.dataset_weights.insert(id.to_string(), share);
    }

    /// Remove a reference together with its weight entry, then
    /// renormalize what remains.
    pub fn remove_dataset(&mut self, id: &str) {
        if !self.datasets.iter().any(|d| d == id) {
            return;
        }
        self.datasets.retain(|d| d != id);
        self.dataset_weights.remove(id);
        self.dataset_weights = renormalized(&self.dataset_weights, &self.datasets);
    }
}

impl FeatureLayer {
    pub fn touch(&mut self) {
        self.updated_at = now_iso8601();
    }

    pub fn add_category(&mut self, id: &str) {
        if self.categories.iter().any(|c| c == id) {
            return;
        }
        self.categories.push(id.to_string());
        let share = 100.0 / self.categories.len() as f64;
        self.category_weights.insert(id.to_string(), share);
    }

    pub fn remove_category(&mut self, id: &str) {
        if !self.categories.iter().any(|c| c == id) {
            return;
        }
        self.categories.retain(|c| c != id);
        self.category_weights.remove(id);
        self.category_weights = renormalized(&self.category_weights, &self.categories);
    }
}

fn validate_name(name: &str) -> Result<(), EditorError> {
    if name.trim().is_empty() {
        return Err(EditorError::validation("Project name must not be empty"));
    }
    Ok(())
}

fn field_map_warnings(
    selected_fields: &[String],
    field_types: &HashMap<String, FieldType>,
    field_weights: &HashMap<String, f64>,
    field_attributes: &HashMap<String, FieldAttributeTable>,
    warnings: &mut Vec<String>,
) -> Result<(), EditorError> {
    for field in selected_fields {
        if !field_types.contains_key(field) {
            return Err(EditorError::validation(format!(
                "Selected field '{field}' has no inferred type"
            )));
        }
    }
    if field_weights.len() != selected_fields.len()
        || selected_fields.iter().any(|f| !field_weights.contains_key(f))
    {
        return Err(EditorError::validation(
            "Field weights must cover exactly the selected fields",
        ));
    }

    if !selected_fields.is_empty() {
        let sum: f64 = selected_fields
            .iter()
            .filter_map(|f| field_weights.get(f))
            .sum();
        if !(0.0..=1.0 + FIELD_WEIGHT_SUM_TOLERANCE).contains(&sum) {
            return Err(EditorError::validation(format!(
                "Field weights sum to {sum:.3}, outside [0, 1]"
            )));
        }
        if (sum - 1.0).abs() > FIELD_WEIGHT_SUM_TOLERANCE {
            warnings.push(format!(
                "Field weights sum to {:.0}% instead of 100%",
                sum * 100.0
            ));
        }
    }

    for (field, table) in field_attributes {
        if table.attribute_weights.is_empty() {
            continue;
        }
        let sum: f64 = table.attribute_weights.values().sum();
        if (sum - 100.0).abs() > ATTRIBUTE_WEIGHT_SUM_TOLERANCE {
            warnings.push(format!(
                "Attribute weights for '{field}' sum to {sum:.1} instead of 100"
            ));
        }
    }
    Ok(())
}

fn reference_weight_warnings(
    label: &str,
    ids: &[String],
    weights: &HashMap<String, f64>,
    warnings: &mut Vec<String>,
) {
    if ids.is_empty() {
        return;
    }
    let sum: f64 = ids.iter().filter_map(|id| weights.get(id)).sum();
    if (sum - 100.0).abs() > REFERENCE_WEIGHT_SUM_TOLERANCE {
        warnings.push(format!(
            "{label} weights sum to {sum:.1} instead of 100"
        ));
    }
}

/// Shape-level validation run on save. Hard failures (empty name, weight
/// domain mismatches) come back as errors; weight-sum drift inside the
/// tolerance bands comes back as warnings. Referential integrity against
/// the store is checked separately by the store itself.
pub fn validate_for_save(project: &Project) -> Result<Vec<String>, EditorError> {
    let mut warnings = Vec::new();
    validate_name(project.name())?;
    match project {
        Project::Dataset(d) => {
            field_map_warnings(
                &d.selected_fields,
                &d.field_types,
                &d.field_weights,
                &d.field_attributes,
                &mut warnings,
            )?;
        }
        Project::Category(c) => {
            reference_weight_warnings("Dataset", &c.datasets, &c.dataset_weights, &mut warnings);
        }
        Project::FeatureLayer(f) => {
            reference_weight_warnings(
                "Category",
                &f.categories,
                &f.category_weights,
                &mut warnings,
            );
        }
    }
    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_match_the_documented_pattern() {
        for _ in 0..20 {
            let id = generate_project_id();
            assert!(is_valid_project_id(&id), "bad id: {id}");
        }
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(!is_valid_project_id("proj_abc_123456789"));
        assert!(!is_valid_project_id("proj_17000_short"));
        assert!(!is_valid_project_id("dataset_1700000000000_abcdefghi"));
    }

    #[test]
    fn factories_stamp_timestamps_and_kind() {
        let dataset = new_dataset("roads");
        assert_eq!(dataset.name, "roads");
        assert!(!dataset.created_at.is_empty());
        assert_eq!(dataset.created_at, dataset.updated_at);

        let project = Project::Dataset(dataset);
        assert_eq!(project.kind(), ProjectKind::Dataset);
    }

    #[test]
    fn duplicate_references_are_ignored() {
        let mut category = new_category("infrastructure");
        category.add_dataset("proj_1_aaaaaaaaa");
        category.add_dataset("proj_1_aaaaaaaaa");
        assert_eq!(category.datasets.len(), 1);
        assert_eq!(category.dataset_weights["proj_1_aaaaaaaaa"], 100.0);
    }

    #[test]
    fn removing_a_reference_renormalizes_weights() {
        let mut category = new_category("infrastructure");
        category.add_dataset("a");
        category.add_dataset("b");
        category.add_dataset("c");
        category.dataset_weights.insert("a".to_string(), 50.0);
        category.dataset_weights.insert("b".to_string(), 25.0);
        category.dataset_weights.insert("c".to_string(), 25.0);

        category.remove_dataset("a");
        assert_eq!(category.datasets, vec!["b".to_string(), "c".to_string()]);
        assert!(!category.dataset_weights.contains_key("a"));
        let sum: f64 = category.dataset_weights.values().sum();
        assert!((sum - 100.0).abs() < 1e-6);
    }

    #[test]
    fn empty_name_fails_validation() {
        let dataset = new_dataset("   ");
        let err = validate_for_save(&Project::Dataset(dataset)).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Validation);
    }

    #[test]
    fn weight_domain_mismatch_is_a_hard_error() {
        let mut dataset = new_dataset("roads");
        dataset
            .field_types
            .insert("a".to_string(), FieldType::Quantitative);
        dataset.selected_fields.push("a".to_string());
        // field_weights missing 'a'
        let err = validate_for_save(&Project::Dataset(dataset)).unwrap_err();
        assert!(err.message.contains("selected fields"));
    }

    #[test]
    fn weight_sum_drift_is_a_soft_warning() {
        let mut dataset = new_dataset("roads");
        dataset
            .field_types
            .insert("a".to_string(), FieldType::Quantitative);
        dataset.selected_fields.push("a".to_string());
        dataset.field_weights.insert("a".to_string(), 0.5);
        let warnings = validate_for_save(&Project::Dataset(dataset)).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("50%"));
    }

    #[test]
    fn reference_weight_drift_warns_on_categories() {
        let mut category = new_category("infrastructure");
        category.add_dataset("a");
        category.add_dataset("b");
        category.dataset_weights.insert("a".to_string(), 80.0);
        category.dataset_weights.insert("b".to_string(), 80.0);
        let warnings = validate_for_save(&Project::Category(category)).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("160"));
    }

    #[test]
    fn project_enum_serializes_with_kind_tag() {
        let layer = new_feature_layer("composite");
        let json = serde_json::to_value(Project::FeatureLayer(layer)).unwrap();
        assert_eq!(json["type"], "featurelayer");
    }
}
