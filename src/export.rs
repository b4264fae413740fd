use crate::{
    error::EditorError,
    field_inference::{FieldAttributeTable, FieldMeta, FieldType},
    project::Project,
    workflow::ProjectAction,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{collections::HashMap, fs};

/// Format version of the downloadable configuration.
pub const EXPORT_VERSION: &str = "2.0";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldStatistics {
    pub unique_count: usize,
    pub top_value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Statistics {
    pub summary: HashMap<String, Value>,
    pub fields: HashMap<String, FieldStatistics>,
}

/// The downloadable single-configuration export (§ external interfaces).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportConfiguration {
    pub project_type: String,
    pub project_action: String,
    pub current_project: Option<String>,
    pub dataset_name: String,
    pub description: String,
    pub timestamp: String,
    pub selected_fields: Vec<String>,
    pub field_types: HashMap<String, FieldType>,
    pub field_weights: HashMap<String, f64>,
    pub field_meta: HashMap<String, FieldMeta>,
    pub field_attributes: HashMap<String, FieldAttributeTable>,
    pub statistics: Statistics,
    pub version: String,
}

fn statistics_for(
    feature_count: usize,
    reference_count: Option<usize>,
    selected_fields: &[String],
    field_types: &HashMap<String, FieldType>,
    field_attributes: &HashMap<String, FieldAttributeTable>,
) -> Statistics {
    let qualitative = selected_fields
        .iter()
        .filter(|f| field_types.get(*f) == Some(&FieldType::Qualitative))
        .count();

    let mut summary = HashMap::new();
    summary.insert("Total Features".to_string(), json!(feature_count));
    summary.insert("Selected Fields".to_string(), json!(selected_fields.len()));
    summary.insert("Qualitative Fields".to_string(), json!(qualitative));
    if let Some(count) = reference_count {
        summary.insert("Referenced Projects".to_string(), json!(count));
    }

    let fields = field_attributes
        .iter()
        .map(|(field, table)| {
            (
                field.clone(),
                FieldStatistics {
                    unique_count: table.unique_values.len(),
                    top_value: table.unique_values.first().cloned(),
                },
            )
        })
        .collect();

    Statistics { summary, fields }
}

/// Build the export configuration for any project kind. Categories and
/// FeatureLayers export their flattened field-level maps.
pub fn build_export(project: &Project, action: ProjectAction) -> ExportConfiguration {
    let action_label = match action {
        ProjectAction::Create => "create",
        ProjectAction::Edit => "edit",
        ProjectAction::View => "view",
    };

    let (description, selected_fields, field_types, field_weights, field_meta, field_attributes, feature_count, reference_count) =
        match project {
            Project::Dataset(d) => (
                d.description.clone(),
                d.selected_fields.clone(),
                d.field_types.clone(),
                d.field_weights.clone(),
                d.field_meta.clone(),
                d.field_attributes.clone(),
                d.features.len(),
                None,
            ),
            Project::Category(c) => (
                c.description.clone(),
                c.selected_fields.clone(),
                c.field_types.clone(),
                c.field_weights.clone(),
                c.field_meta.clone(),
                c.field_attributes.clone(),
                0,
                Some(c.datasets.len()),
            ),
            Project::FeatureLayer(f) => (
                f.description.clone(),
                f.selected_fields.clone(),
                f.field_types.clone(),
                f.field_weights.clone(),
                f.field_meta.clone(),
                f.field_attributes.clone(),
                0,
                Some(f.categories.len()),
            ),
        };

    let statistics = statistics_for(
        feature_count,
        reference_count,
        &selected_fields,
        &field_types,
        &field_attributes,
    );

    ExportConfiguration {
        project_type: project.kind().label().to_string(),
        project_action: action_label.to_string(),
        current_project: Some(project.id().to_string()),
        dataset_name: project.name().to_string(),
        description,
        timestamp: Utc::now().to_rfc3339(),
        selected_fields,
        field_types,
        field_weights,
        field_meta,
        field_attributes,
        statistics,
        version: EXPORT_VERSION.to_string(),
    }
}

impl ExportConfiguration {
    pub fn save_to_path(&self, path: &str) -> Result<(), EditorError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| EditorError::internal(format!("Could not serialize export: {e}")))?;
        fs::write(path, text)
            .map_err(|e| EditorError::io(format!("Could not write export '{path}': {e}")))
    }
}

/// POST a configuration to `/json-editor/api/save`.
pub fn post_export(base_url: &str, config: &ExportConfiguration) -> Result<(), EditorError> {
    let url = format!("{base_url}/json-editor/api/save");
    let response = reqwest::blocking::Client::new()
        .post(&url)
        .json(config)
        .send()
        .map_err(|e| EditorError::transport(format!("Could not reach '{url}': {e}")))?;
    if !response.status().is_success() {
        return Err(EditorError::transport(format!(
            "Export upload failed: HTTP {}",
            response.status()
        )));
    }
    Ok(())
}
