use crate::{
    data_source::{DataSource, DataSourceGateway},
    error::EditorError,
    export::{build_export, ExportConfiguration},
    feature::property_names,
    field_inference::{
        aggregate_attributes, infer_field_types, merge_attributes, FieldMeta, FieldType,
    },
    map_host::{MapRequest, MapSession},
    project::{new_category, new_dataset, new_feature_layer, Dataset, Project, ProjectKind},
    store::ProjectStore,
    toast::Toast,
    weights::{WeightEngine, WeightScale},
    workflow::{steps_for, IndicatorState, ProjectAction, Step, StepContext, Workflow},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::info;

pub type OpId = String;

/// Every user-level mutation of the editor. Views never touch the model
/// directly; they submit one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    SelectProject {
        kind: ProjectKind,
        action: ProjectAction,
        id: Option<String>,
    },
    SetName {
        name: String,
    },
    SetDescription {
        description: String,
    },
    LoadData {
        source: DataSource,
        limit: Option<usize>,
    },
    ToggleField {
        field: String,
    },
    ResetEqualWeights,
    SetFieldWeight {
        field: String,
        weight: f64,
    },
    LockField {
        field: String,
    },
    UnlockField {
        field: String,
    },
    SetFieldMeta {
        field: String,
        meaning: String,
        importance: String,
    },
    ExpandAttributes {
        field: String,
    },
    SetAttributeWeight {
        field: String,
        value: String,
        weight: f64,
    },
    SetAttributeMeta {
        field: String,
        value: String,
        meaning: String,
        importance: String,
    },
    LockAttribute {
        field: String,
        value: String,
    },
    UnlockAttribute {
        field: String,
        value: String,
    },
    AddReference {
        id: String,
    },
    RemoveReference {
        id: String,
    },
    SetReferenceWeight {
        id: String,
        weight: f64,
    },
    LockReference {
        id: String,
    },
    UnlockReference {
        id: String,
    },
    NextStep,
    PrevStep,
    GoToStep {
        index: usize,
    },
    SaveProject,
    DeleteProject {
        id: String,
    },
    ExportConfiguration {
        path: Option<String>,
    },
    SubmitMapRequest {
        request: MapRequest,
    },
    SetMapStyle {
        style: String,
    },
}

impl Operation {
    /// Operations that mutate the draft or the store; rejected in view
    /// mode.
    fn mutates_model(&self) -> bool {
        !matches!(
            self,
            Operation::SelectProject { .. }
                | Operation::NextStep
                | Operation::PrevStep
                | Operation::GoToStep { .. }
                | Operation::ExportConfiguration { .. }
                | Operation::SubmitMapRequest { .. }
                | Operation::SetMapStyle { .. }
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpResult {
    pub op_id: OpId,
    pub changed_ids: Vec<String>,
    pub warnings: Vec<String>,
    pub toasts: Vec<Toast>,
    /// Operation-specific payload (figure, export configuration).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub op: Operation,
    pub result: OpResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub protocol_version: String,
    pub supported_operations: Vec<String>,
    pub export_version: String,
}

/// Transient per-session editing state. Never written to the project
/// record; a return to project selection clears it wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Draft {
    pub project: Option<Project>,
    pub source: Option<DataSource>,
    pub saved: bool,
    field_locks: HashSet<String>,
    attribute_locks: HashMap<String, HashSet<String>>,
    reference_locks: HashSet<String>,
    expanded_fields: HashSet<String>,
}

impl Draft {
    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// The part of the engine a headless driver carries across invocations:
/// workflow position plus the draft. The project record itself lives in
/// the store's mirror, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub workflow: Workflow,
    pub draft: Draft,
}

impl SessionState {
    pub fn load_from_path(path: &str) -> Result<Self, EditorError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EditorError::io(format!("Could not read session '{path}': {e}")))?;
        serde_json::from_str(&text)
            .map_err(|e| EditorError::data_shape(format!("Unreadable session '{path}': {e}")))
    }

    pub fn save_to_path(&self, path: &str) -> Result<(), EditorError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .map_err(|e| EditorError::io(format!("Could not write session '{path}': {e}")))
    }
}

/// The editor core: one state value, mutated only through `apply`. The
/// gateway fetch, the remote upsert and the map request are the only
/// blocking points, each behind its collaborator trait.
pub struct EditorEngine {
    store: ProjectStore,
    gateway: Box<dyn DataSourceGateway>,
    map: MapSession,
    workflow: Workflow,
    draft: Draft,
    journal: Vec<OperationRecord>,
    op_counter: u64,
}

impl EditorEngine {
    pub fn new(
        mut store: ProjectStore,
        gateway: Box<dyn DataSourceGateway>,
        map: MapSession,
    ) -> Self {
        store.load();
        Self {
            store,
            gateway,
            map,
            workflow: Workflow::new(),
            draft: Draft::default(),
            journal: Vec::new(),
            op_counter: 0,
        }
    }

    pub fn capabilities() -> Capabilities {
        Capabilities {
            protocol_version: "v1".to_string(),
            supported_operations: [
                "SelectProject",
                "SetName",
                "SetDescription",
                "LoadData",
                "ToggleField",
                "ResetEqualWeights",
                "SetFieldWeight",
                "LockField",
                "UnlockField",
                "SetFieldMeta",
                "ExpandAttributes",
                "SetAttributeWeight",
                "SetAttributeMeta",
                "LockAttribute",
                "UnlockAttribute",
                "AddReference",
                "RemoveReference",
                "SetReferenceWeight",
                "LockReference",
                "UnlockReference",
                "NextStep",
                "PrevStep",
                "GoToStep",
                "SaveProject",
                "DeleteProject",
                "ExportConfiguration",
                "SubmitMapRequest",
                "SetMapStyle",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            export_version: crate::export::EXPORT_VERSION.to_string(),
        }
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn draft_project(&self) -> Option<&Project> {
        self.draft.project.as_ref()
    }

    pub fn map_session(&self) -> &MapSession {
        &self.map
    }

    pub fn indicator_states(&self) -> Vec<IndicatorState> {
        self.workflow.indicator_states()
    }

    pub fn operation_log(&self) -> &[OperationRecord] {
        &self.journal
    }

    pub fn session(&self) -> SessionState {
        SessionState {
            workflow: self.workflow.clone(),
            draft: self.draft.clone(),
        }
    }

    pub fn restore_session(&mut self, session: SessionState) {
        self.workflow = session.workflow;
        self.draft = session.draft;
    }

    fn next_op_id(&mut self) -> OpId {
        self.op_counter += 1;
        format!("op-{}", self.op_counter)
    }

    fn step_context(&self) -> StepContext {
        let (name_nonempty, loaded, selected, references) = match &self.draft.project {
            Some(Project::Dataset(d)) => (
                !d.name.trim().is_empty(),
                d.features.len(),
                d.selected_fields.len(),
                0,
            ),
            Some(Project::Category(c)) => (!c.name.trim().is_empty(), 0, 0, c.datasets.len()),
            Some(Project::FeatureLayer(f)) => {
                (!f.name.trim().is_empty(), 0, 0, f.categories.len())
            }
            None => (false, 0, 0, 0),
        };
        StepContext {
            name_nonempty,
            loaded_feature_count: loaded,
            selected_field_count: selected,
            reference_count: references,
            saved: self.draft.saved,
        }
    }

    fn draft_project_mut(&mut self) -> Result<&mut Project, EditorError> {
        self.draft
            .project
            .as_mut()
            .ok_or_else(|| EditorError::validation("No project is being edited"))
    }

    fn draft_dataset_mut(&mut self) -> Result<&mut Dataset, EditorError> {
        match self.draft_project_mut()? {
            Project::Dataset(d) => Ok(d),
            _ => Err(EditorError::validation(
                "This operation applies only to datasets",
            )),
        }
    }

    fn touch_draft(&mut self) {
        self.draft.saved = false;
        match &mut self.draft.project {
            Some(Project::Dataset(d)) => d.touch(),
            Some(Project::Category(c)) => c.touch(),
            Some(Project::FeatureLayer(f)) => f.touch(),
            None => {}
        }
    }

    /// Apply one operation, journal it, and return its result.
    pub fn apply(&mut self, op: Operation) -> Result<OpResult, EditorError> {
        if self.workflow.is_view() && op.mutates_model() {
            return Err(EditorError::validation("This project is open read-only"));
        }
        let op_id = self.next_op_id();
        let mut result = OpResult {
            op_id,
            ..OpResult::default()
        };

        match op.clone() {
            Operation::SelectProject { kind, action, id } => {
                self.select_project(kind, action, id, &mut result)?
            }
            Operation::SetName { name } => {
                match self.draft_project_mut()? {
                    Project::Dataset(d) => d.name = name,
                    Project::Category(c) => c.name = name,
                    Project::FeatureLayer(f) => f.name = name,
                }
                self.touch_draft();
            }
            Operation::SetDescription { description } => {
                match self.draft_project_mut()? {
                    Project::Dataset(d) => d.description = description,
                    Project::Category(c) => c.description = description,
                    Project::FeatureLayer(f) => f.description = description,
                }
                self.touch_draft();
            }
            Operation::LoadData { source, limit } => self.load_data(source, limit, &mut result)?,
            Operation::ToggleField { field } => self.toggle_field(&field)?,
            Operation::ResetEqualWeights => self.reset_equal_weights()?,
            Operation::SetFieldWeight { field, weight } => self.set_field_weight(&field, weight)?,
            Operation::LockField { field } => {
                self.draft.field_locks.insert(field);
            }
            Operation::UnlockField { field } => {
                self.draft.field_locks.remove(&field);
            }
            Operation::SetFieldMeta {
                field,
                meaning,
                importance,
            } => self.set_field_meta(&field, meaning, importance)?,
            Operation::ExpandAttributes { field } => self.expand_attributes(&field)?,
            Operation::SetAttributeWeight {
                field,
                value,
                weight,
            } => self.set_attribute_weight(&field, &value, weight)?,
            Operation::SetAttributeMeta {
                field,
                value,
                meaning,
                importance,
            } => self.set_attribute_meta(&field, &value, meaning, importance)?,
            Operation::LockAttribute { field, value } => {
                self.draft
                    .attribute_locks
                    .entry(field)
                    .or_default()
                    .insert(value);
            }
            Operation::UnlockAttribute { field, value } => {
                if let Some(locks) = self.draft.attribute_locks.get_mut(&field) {
                    locks.remove(&value);
                }
            }
            Operation::AddReference { id } => self.add_reference(&id)?,
            Operation::RemoveReference { id } => self.remove_reference(&id)?,
            Operation::SetReferenceWeight { id, weight } => self.set_reference_weight(&id, weight)?,
            Operation::LockReference { id } => {
                self.draft.reference_locks.insert(id);
            }
            Operation::UnlockReference { id } => {
                self.draft.reference_locks.remove(&id);
            }
            Operation::NextStep => self.next_step(&mut result)?,
            Operation::PrevStep => {
                let step = self.workflow.back();
                if step == Step::ProjectSelection {
                    self.draft.clear();
                }
            }
            Operation::GoToStep { index } => self.go_to_step(index, &mut result)?,
            Operation::SaveProject => self.save_project(&mut result)?,
            Operation::DeleteProject { id } => self.delete_project(&id, &mut result)?,
            Operation::ExportConfiguration { path } => {
                self.export_configuration(path, &mut result)?
            }
            Operation::SubmitMapRequest { request } => {
                let (_outcome, toasts) = self.map.submit(&request)?;
                result.toasts.extend(toasts);
                result.payload = self
                    .map
                    .figure()
                    .map(|f| serde_json::to_value(f).unwrap_or(Value::Null));
            }
            Operation::SetMapStyle { style } => {
                if !self.map.apply_style(&style) {
                    result.toasts.push(Toast::info("No map to restyle yet"));
                }
            }
        }

        self.journal.push(OperationRecord {
            op,
            result: result.clone(),
        });
        Ok(result)
    }

    fn select_project(
        &mut self,
        kind: ProjectKind,
        action: ProjectAction,
        id: Option<String>,
        result: &mut OpResult,
    ) -> Result<(), EditorError> {
        let existing = match &id {
            Some(id) => {
                let project = self.store.find(id).ok_or_else(|| {
                    EditorError::referential(format!("Project '{id}' does not exist"))
                })?;
                if project.kind() != kind {
                    return Err(EditorError::referential(format!(
                        "Project '{id}' is a {}, not a {}",
                        project.kind().label(),
                        kind.label()
                    )));
                }
                Some(project)
            }
            None => None,
        };

        self.workflow.select(kind, action, existing.is_some())?;
        self.draft.clear();
        self.draft.project = Some(match existing {
            Some(project) => {
                self.draft.saved = true;
                project
            }
            None => match kind {
                ProjectKind::Dataset => Project::Dataset(new_dataset("")),
                ProjectKind::Category => Project::Category(new_category("")),
                ProjectKind::FeatureLayer => Project::FeatureLayer(new_feature_layer("")),
            },
        });
        if let Some(project) = &self.draft.project {
            result.changed_ids.push(project.id().to_string());
        }
        Ok(())
    }

    fn load_data(
        &mut self,
        source: DataSource,
        limit: Option<usize>,
        result: &mut OpResult,
    ) -> Result<(), EditorError> {
        let loaded = self.gateway.load(&source, limit)?;
        if loaded.features.is_empty() {
            return Err(EditorError::data_shape(
                "The data source returned no features",
            ));
        }
        let feature_count = loaded.features.len();

        let dataset = self.draft_dataset_mut()?;
        let names = property_names(&loaded.features);
        dataset.field_types = infer_field_types(&loaded.features, &names, &loaded.field_type_hints);

        // Attribute tables for qualitative fields, preserving any edits
        // from a previous load of the same dataset.
        let mut tables = HashMap::new();
        for (field, field_type) in &dataset.field_types {
            if *field_type != FieldType::Qualitative {
                continue;
            }
            let table = match dataset.field_attributes.get(field) {
                Some(existing) => merge_attributes(existing, &loaded.features, field),
                None => aggregate_attributes(&loaded.features, field),
            };
            tables.insert(field.clone(), table);
        }
        dataset.field_attributes = tables;
        dataset.features = loaded.features;

        self.draft.source = Some(source);
        self.touch_draft();
        info!("Loaded {feature_count} features");
        result
            .toasts
            .push(Toast::success(format!("Loaded {feature_count} features")));
        Ok(())
    }

    fn toggle_field(&mut self, field: &str) -> Result<(), EditorError> {
        let dataset = self.draft_dataset_mut()?;
        if !dataset.field_types.contains_key(field) {
            return Err(EditorError::validation(format!("Unknown field '{field}'")));
        }

        if dataset.selected_fields.iter().any(|f| f == field) {
            dataset.selected_fields.retain(|f| f != field);
            let mut engine = WeightEngine::from_weights(
                WeightScale::Fraction,
                &dataset.selected_fields,
                &dataset.field_weights,
            );
            engine.renormalize();
            dataset.field_weights = engine.weights().clone();
            dataset.field_meta.remove(field);
        } else {
            let mut engine = WeightEngine::from_weights(
                WeightScale::Fraction,
                &dataset.selected_fields,
                &dataset.field_weights,
            );
            dataset.selected_fields.push(field.to_string());
            engine.insert_key(field, 1.0 / dataset.selected_fields.len() as f64);
            engine.renormalize();
            dataset.field_weights = engine.weights().clone();
            dataset
                .field_meta
                .entry(field.to_string())
                .or_insert_with(FieldMeta::default);
        }
        self.draft.field_locks.remove(field);
        self.touch_draft();
        Ok(())
    }

    /// The Equal button: equal shares over the keys of the current step's
    /// weight vector, locks included.
    fn reset_equal_weights(&mut self) -> Result<(), EditorError> {
        match self.workflow.current_step() {
            Step::ReferenceWeights => match self.draft_project_mut()? {
                Project::Category(c) => {
                    c.dataset_weights =
                        WeightEngine::initialize(WeightScale::Percent, &c.datasets)
                            .weights()
                            .clone();
                }
                Project::FeatureLayer(f) => {
                    f.category_weights =
                        WeightEngine::initialize(WeightScale::Percent, &f.categories)
                            .weights()
                            .clone();
                }
                Project::Dataset(_) => {
                    return Err(EditorError::internal("Datasets have no reference weights"))
                }
            },
            _ => {
                let dataset = self.draft_dataset_mut()?;
                dataset.field_weights =
                    WeightEngine::initialize(WeightScale::Fraction, &dataset.selected_fields)
                        .weights()
                        .clone();
            }
        }
        self.touch_draft();
        Ok(())
    }

    fn set_field_weight(&mut self, field: &str, weight: f64) -> Result<(), EditorError> {
        let locks = self.draft.field_locks.clone();
        let dataset = self.draft_dataset_mut()?;
        if !dataset.selected_fields.iter().any(|f| f == field) {
            return Err(EditorError::validation(format!(
                "Field '{field}' is not selected"
            )));
        }
        let mut engine = WeightEngine::from_weights(
            WeightScale::Fraction,
            &dataset.selected_fields,
            &dataset.field_weights,
        );
        for key in &locks {
            engine.lock(key);
        }
        engine.set_weight(field, weight);
        dataset.field_weights = engine.weights().clone();
        self.touch_draft();
        Ok(())
    }

    fn set_field_meta(
        &mut self,
        field: &str,
        meaning: String,
        importance: String,
    ) -> Result<(), EditorError> {
        let dataset = self.draft_dataset_mut()?;
        if !dataset.selected_fields.iter().any(|f| f == field) {
            return Err(EditorError::validation(format!(
                "Field '{field}' is not selected"
            )));
        }
        dataset
            .field_meta
            .insert(field.to_string(), FieldMeta { meaning, importance });
        self.touch_draft();
        Ok(())
    }

    fn set_attribute_meta(
        &mut self,
        field: &str,
        value: &str,
        meaning: String,
        importance: String,
    ) -> Result<(), EditorError> {
        let dataset = self.draft_dataset_mut()?;
        let table = dataset.field_attributes.get_mut(field).ok_or_else(|| {
            EditorError::validation(format!("Field '{field}' has no attribute table"))
        })?;
        if !table.unique_values.iter().any(|v| v == value) {
            return Err(EditorError::validation(format!(
                "'{value}' is not a value of '{field}'"
            )));
        }
        table
            .attribute_meta
            .insert(value.to_string(), FieldMeta { meaning, importance });
        self.touch_draft();
        Ok(())
    }

    fn expand_attributes(&mut self, field: &str) -> Result<(), EditorError> {
        let dataset = self.draft_dataset_mut()?;
        if dataset.field_types.get(field) != Some(&FieldType::Qualitative) {
            return Err(EditorError::validation(format!(
                "Field '{field}' is not qualitative"
            )));
        }
        // Idempotent: an existing table survives re-expansion untouched.
        if !dataset.field_attributes.contains_key(field) {
            let table = aggregate_attributes(&dataset.features, field);
            dataset.field_attributes.insert(field.to_string(), table);
        }
        self.draft.expanded_fields.insert(field.to_string());
        Ok(())
    }

    fn set_attribute_weight(
        &mut self,
        field: &str,
        value: &str,
        weight: f64,
    ) -> Result<(), EditorError> {
        let locks = self
            .draft
            .attribute_locks
            .get(field)
            .cloned()
            .unwrap_or_default();
        let dataset = self.draft_dataset_mut()?;
        let table = dataset.field_attributes.get_mut(field).ok_or_else(|| {
            EditorError::validation(format!("Field '{field}' has no attribute table"))
        })?;
        if !table.unique_values.iter().any(|v| v == value) {
            return Err(EditorError::validation(format!(
                "'{value}' is not a value of '{field}'"
            )));
        }
        let mut engine = WeightEngine::from_weights(
            WeightScale::Percent,
            &table.unique_values,
            &table.attribute_weights,
        );
        for key in &locks {
            engine.lock(key);
        }
        engine.set_weight(value, weight);
        table.attribute_weights = engine.weights().clone();
        self.touch_draft();
        Ok(())
    }

    fn add_reference(&mut self, id: &str) -> Result<(), EditorError> {
        let referenced = self
            .store
            .find(id)
            .ok_or_else(|| EditorError::referential(format!("Project '{id}' does not exist")))?;
        match self.draft_project_mut()? {
            Project::Category(c) => {
                // The kinds form a strict DAG: categories reference
                // datasets only.
                if referenced.kind() != ProjectKind::Dataset {
                    return Err(EditorError::referential(
                        "Categories may only reference datasets",
                    ));
                }
                c.add_dataset(id);
            }
            Project::FeatureLayer(f) => {
                if referenced.kind() != ProjectKind::Category {
                    return Err(EditorError::referential(
                        "Feature layers may only reference categories",
                    ));
                }
                f.add_category(id);
            }
            Project::Dataset(_) => {
                return Err(EditorError::validation("Datasets hold no references"))
            }
        }
        self.touch_draft();
        Ok(())
    }

    fn remove_reference(&mut self, id: &str) -> Result<(), EditorError> {
        match self.draft_project_mut()? {
            Project::Category(c) => c.remove_dataset(id),
            Project::FeatureLayer(f) => f.remove_category(id),
            Project::Dataset(_) => {
                return Err(EditorError::validation("Datasets hold no references"))
            }
        }
        self.draft.reference_locks.remove(id);
        self.touch_draft();
        Ok(())
    }

    fn set_reference_weight(&mut self, id: &str, weight: f64) -> Result<(), EditorError> {
        let locks = self.draft.reference_locks.clone();
        let (keys, weights) = match self.draft_project_mut()? {
            Project::Category(c) => (c.datasets.clone(), c.dataset_weights.clone()),
            Project::FeatureLayer(f) => (f.categories.clone(), f.category_weights.clone()),
            Project::Dataset(_) => {
                return Err(EditorError::validation("Datasets hold no references"))
            }
        };
        if !keys.iter().any(|k| k == id) {
            return Err(EditorError::validation(format!(
                "Project '{id}' is not referenced"
            )));
        }
        let mut engine = WeightEngine::from_weights(WeightScale::Percent, &keys, &weights);
        for key in &locks {
            engine.lock(key);
        }
        engine.set_weight(id, weight);
        let updated = engine.weights().clone();
        match self.draft_project_mut()? {
            Project::Category(c) => c.dataset_weights = updated,
            Project::FeatureLayer(f) => f.category_weights = updated,
            Project::Dataset(_) => unreachable!(),
        }
        self.touch_draft();
        Ok(())
    }

    /// Advancing into Export saves first, matching the rule that an
    /// entity reaches the export step only through the store.
    fn ensure_saved_for_export(&mut self, result: &mut OpResult) -> Result<(), EditorError> {
        if self.draft.saved {
            return Ok(());
        }
        self.save_project(result)
    }

    fn next_step(&mut self, result: &mut OpResult) -> Result<(), EditorError> {
        if let (Some(target), Some(kind)) = (self.workflow.next_index(), self.workflow.kind()) {
            if steps_for(kind)[target] == Step::Export && !self.workflow.is_view() {
                self.ensure_saved_for_export(result)?;
            }
        }
        let ctx = self.step_context();
        self.workflow.advance(&ctx)?;
        Ok(())
    }

    fn go_to_step(&mut self, index: usize, result: &mut OpResult) -> Result<(), EditorError> {
        if let Some(kind) = self.workflow.kind() {
            let steps = steps_for(kind);
            if index < steps.len()
                && steps[index] == Step::Export
                && Some(index) == self.workflow.next_index()
                && !self.workflow.is_view()
            {
                self.ensure_saved_for_export(result)?;
            }
        }
        let ctx = self.step_context();
        let step = self.workflow.go_to(index, &ctx)?;
        if step == Step::ProjectSelection {
            self.draft.clear();
        }
        Ok(())
    }

    fn save_project(&mut self, result: &mut OpResult) -> Result<(), EditorError> {
        let project = self
            .draft
            .project
            .clone()
            .ok_or_else(|| EditorError::validation("No project is being edited"))?;
        let id = project.id().to_string();
        let toasts = self.store.save_project(project)?;
        result.toasts.extend(toasts);
        result.toasts.push(Toast::success("Project saved"));
        result.changed_ids.push(id);
        self.draft.saved = true;
        Ok(())
    }

    fn delete_project(&mut self, id: &str, result: &mut OpResult) -> Result<(), EditorError> {
        let referrers = self.store.find_referrers(id);
        if !referrers.is_empty() {
            result.warnings.push(format!(
                "Removed from {} referring project(s)",
                referrers.len()
            ));
        }
        result.toasts.extend(self.store.remove(id));
        result.changed_ids.push(id.to_string());
        result.changed_ids.extend(referrers);

        if self.draft.project.as_ref().is_some_and(|p| p.id() == id) {
            self.draft.clear();
            self.workflow.reset();
        }
        Ok(())
    }

    fn export_configuration(
        &mut self,
        path: Option<String>,
        result: &mut OpResult,
    ) -> Result<(), EditorError> {
        let config = self.build_export()?;
        if let Some(path) = &path {
            config.save_to_path(path)?;
            result
                .toasts
                .push(Toast::success(format!("Export written to '{path}'")));
        }
        result.payload = Some(serde_json::to_value(&config)?);
        Ok(())
    }

    /// The export configuration for the current draft.
    pub fn build_export(&self) -> Result<ExportConfiguration, EditorError> {
        let project = self
            .draft
            .project
            .as_ref()
            .ok_or_else(|| EditorError::validation("No project is being edited"))?;
        let action = self.workflow.action().unwrap_or(ProjectAction::Create);
        Ok(build_export(project, action))
    }
}
