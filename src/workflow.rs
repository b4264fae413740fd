use crate::{error::EditorError, project::ProjectKind};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectAction {
    Create,
    Edit,
    View,
}

/// The views a project can move through. Datasets get the load/field/
/// weight sequence; Categories and FeatureLayers get the two reference
/// steps instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    ProjectSelection,
    LoadData,
    FieldSelection,
    WeightControls,
    ReferenceSelection,
    ReferenceWeights,
    Export,
}

lazy_static! {
    /// Canonical step sequence per project kind. Actions do not change
    /// the sequence, only how it is traversed (edit skips LoadData, view
    /// jumps to the terminal step).
    static ref STEP_TABLE: HashMap<ProjectKind, Vec<Step>> = {
        let mut table = HashMap::new();
        table.insert(
            ProjectKind::Dataset,
            vec![
                Step::ProjectSelection,
                Step::LoadData,
                Step::FieldSelection,
                Step::WeightControls,
                Step::Export,
            ],
        );
        table.insert(
            ProjectKind::Category,
            vec![
                Step::ProjectSelection,
                Step::ReferenceSelection,
                Step::ReferenceWeights,
                Step::Export,
            ],
        );
        table.insert(
            ProjectKind::FeatureLayer,
            vec![
                Step::ProjectSelection,
                Step::ReferenceSelection,
                Step::ReferenceWeights,
                Step::Export,
            ],
        );
        table
    };
}

pub fn steps_for(kind: ProjectKind) -> &'static [Step] {
    &STEP_TABLE[&kind]
}

/// The facts forward preconditions look at. The engine fills this from
/// the current draft so the state machine itself stays pure.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepContext {
    pub name_nonempty: bool,
    pub loaded_feature_count: usize,
    pub selected_field_count: usize,
    pub reference_count: usize,
    pub saved: bool,
}

/// How a step indicator should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorState {
    Done,
    Active,
    /// One ahead of the active step; clickable.
    Reachable,
    Inert,
}

/// Finite state machine over `(project_kind, action, step_index)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workflow {
    kind: Option<ProjectKind>,
    action: Option<ProjectAction>,
    step_index: usize,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(&self) -> Option<ProjectKind> {
        self.kind
    }

    pub fn action(&self) -> Option<ProjectAction> {
        self.action
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn current_step(&self) -> Step {
        match self.kind {
            Some(kind) => steps_for(kind)[self.step_index],
            None => Step::ProjectSelection,
        }
    }

    pub fn is_view(&self) -> bool {
        self.action == Some(ProjectAction::View)
    }

    fn terminal_index(kind: ProjectKind) -> usize {
        steps_for(kind).len() - 1
    }

    /// Step 0 choice: kind and action, plus whether an existing entity
    /// is selected (required for edit and view).
    pub fn select(
        &mut self,
        kind: ProjectKind,
        action: ProjectAction,
        has_entity: bool,
    ) -> Result<(), EditorError> {
        if action != ProjectAction::Create && !has_entity {
            return Err(EditorError::validation(
                "Editing or viewing requires selecting an existing project",
            ));
        }
        self.kind = Some(kind);
        self.action = Some(action);
        self.step_index = 0;
        Ok(())
    }

    /// The index a forward transition from the current step lands on.
    /// Dataset edit skips LoadData; view jumps to the terminal step.
    pub fn next_index(&self) -> Option<usize> {
        let kind = self.kind?;
        let action = self.action?;
        let terminal = Self::terminal_index(kind);
        if self.step_index >= terminal {
            return None;
        }
        let next = match action {
            ProjectAction::View => terminal,
            ProjectAction::Edit if kind == ProjectKind::Dataset && self.step_index == 0 => 2,
            _ => self.step_index + 1,
        };
        Some(next)
    }

    fn check_forward(&self, target: usize, ctx: &StepContext) -> Result<(), EditorError> {
        let kind = self
            .kind
            .ok_or_else(|| EditorError::validation("Pick a project type and action first"))?;
        let steps = steps_for(kind);
        match steps[target] {
            Step::FieldSelection => {
                if !ctx.name_nonempty {
                    return Err(EditorError::validation("Project name must not be empty"));
                }
                if ctx.loaded_feature_count == 0 {
                    return Err(EditorError::validation(
                        "Load a data source with at least one feature first",
                    ));
                }
            }
            Step::WeightControls => {
                if ctx.selected_field_count == 0 {
                    return Err(EditorError::validation("Select at least one field first"));
                }
            }
            Step::ReferenceWeights => {
                if !ctx.name_nonempty {
                    return Err(EditorError::validation("Project name must not be empty"));
                }
                if ctx.reference_count == 0 {
                    return Err(EditorError::validation(
                        "Select at least one project to reference first",
                    ));
                }
            }
            Step::Export => {
                if !ctx.saved {
                    return Err(EditorError::validation(
                        "The project must be saved before export",
                    ));
                }
            }
            Step::ProjectSelection | Step::LoadData | Step::ReferenceSelection => {}
        }
        Ok(())
    }

    /// Forward transition with precondition checks.
    pub fn advance(&mut self, ctx: &StepContext) -> Result<Step, EditorError> {
        let target = self
            .next_index()
            .ok_or_else(|| EditorError::validation("Already on the final step"))?;
        self.check_forward(target, ctx)?;
        self.step_index = target;
        Ok(self.current_step())
    }

    /// Backward transitions are unconditional. Landing on step 0 is the
    /// caller's cue to reset all transient draft state.
    pub fn back(&mut self) -> Step {
        let Some(kind) = self.kind else {
            return Step::ProjectSelection;
        };
        if self.step_index == 0 {
            return self.current_step();
        }
        // Mirror the dataset-edit skip on the way back.
        if self.action == Some(ProjectAction::Edit)
            && kind == ProjectKind::Dataset
            && self.step_index == 2
        {
            self.step_index = 0;
        } else {
            self.step_index -= 1;
        }
        self.current_step()
    }

    /// Jump via a step indicator: any earlier step unconditionally, the
    /// one-ahead step with its preconditions, anything farther is inert.
    pub fn go_to(&mut self, index: usize, ctx: &StepContext) -> Result<Step, EditorError> {
        let kind = self
            .kind
            .ok_or_else(|| EditorError::validation("Pick a project type and action first"))?;
        if index >= steps_for(kind).len() {
            return Err(EditorError::validation(format!("No step {index} for this project type")));
        }
        if index == self.step_index {
            return Ok(self.current_step());
        }
        if index < self.step_index {
            self.step_index = index;
            return Ok(self.current_step());
        }
        if Some(index) == self.next_index() {
            self.check_forward(index, ctx)?;
            self.step_index = index;
            return Ok(self.current_step());
        }
        Err(EditorError::validation(
            "That step is not reachable yet",
        ))
    }

    /// Indicator rendering for the active kind: earlier steps Done, the
    /// current Active, the next-reachable clickable, the rest inert.
    pub fn indicator_states(&self) -> Vec<IndicatorState> {
        let Some(kind) = self.kind else {
            return vec![IndicatorState::Active];
        };
        let next = self.next_index();
        steps_for(kind)
            .iter()
            .enumerate()
            .map(|(i, _)| {
                if i < self.step_index {
                    IndicatorState::Done
                } else if i == self.step_index {
                    IndicatorState::Active
                } else if Some(i) == next {
                    IndicatorState::Reachable
                } else {
                    IndicatorState::Inert
                }
            })
            .collect()
    }

    /// Return to project selection, forgetting kind and action. The
    /// engine clears the draft alongside.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
