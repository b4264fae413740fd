use crate::{
    error::EditorError,
    project::{validate_for_save, Category, Dataset, FeatureLayer, Project},
    toast::Toast,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::PathBuf};
use tracing::warn;

/// Key under which the project record is mirrored locally.
pub const MIRROR_KEY: &str = "geoeditor_projects";

/// The persisted project record: one collection per entity kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectCollections {
    pub datasets: Vec<Dataset>,
    pub categories: Vec<Category>,
    pub featurelayers: Vec<FeatureLayer>,
}

impl ProjectCollections {
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty() && self.categories.is_empty() && self.featurelayers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.datasets.len() + self.categories.len() + self.featurelayers.len()
    }
}

/// Durable synchronous key/value storage for the local mirror.
pub trait LocalMirror {
    fn read(&self, key: &str) -> Result<Option<String>, EditorError>;
    fn write(&mut self, key: &str, value: &str) -> Result<(), EditorError>;
}

/// File-backed mirror: each key becomes `<dir>/<key>.json`.
pub struct FileMirror {
    dir: PathBuf,
}

impl FileMirror {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl LocalMirror for FileMirror {
    fn read(&self, key: &str) -> Result<Option<String>, EditorError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|e| {
            EditorError::io(format!("Could not read mirror '{}': {e}", path.display()))
        })?;
        Ok(Some(text))
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), EditorError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            EditorError::io(format!(
                "Could not create mirror directory '{}': {e}",
                self.dir.display()
            ))
        })?;
        let path = self.path_for(key);
        fs::write(&path, value).map_err(|e| {
            EditorError::io(format!("Could not write mirror '{}': {e}", path.display()))
        })
    }
}

/// In-memory mirror for tests and ephemeral sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryMirror {
    entries: HashMap<String, String>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalMirror for MemoryMirror {
    fn read(&self, key: &str) -> Result<Option<String>, EditorError> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), EditorError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Advisory bulk upsert to the remote project endpoint. Failure never
/// reverts a local write.
pub trait RemoteSink {
    fn upsert(&self, collections: &ProjectCollections) -> Result<(), EditorError>;
}

/// POSTs the full record to `/json-editor/api/save_projects`.
pub struct HttpRemoteSink {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpRemoteSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl RemoteSink for HttpRemoteSink {
    fn upsert(&self, collections: &ProjectCollections) -> Result<(), EditorError> {
        let url = format!("{}/json-editor/api/save_projects", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(collections)
            .send()
            .map_err(|e| EditorError::transport(format!("Could not reach '{url}': {e}")))?;
        if !response.status().is_success() {
            return Err(EditorError::transport(format!(
                "Project upsert to '{url}' failed: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Sink that drops the record; used offline and in tests.
pub struct NullRemoteSink;

impl RemoteSink for NullRemoteSink {
    fn upsert(&self, _collections: &ProjectCollections) -> Result<(), EditorError> {
        Ok(())
    }
}

/// Durable set of the three entity collections: an in-memory working
/// copy, a synchronous local mirror and an advisory remote push.
pub struct ProjectStore {
    mirror: Box<dyn LocalMirror>,
    remote: Box<dyn RemoteSink>,
    collections: ProjectCollections,
}

impl ProjectStore {
    pub fn new(mirror: Box<dyn LocalMirror>, remote: Box<dyn RemoteSink>) -> Self {
        Self {
            mirror,
            remote,
            collections: ProjectCollections::default(),
        }
    }

    pub fn collections(&self) -> &ProjectCollections {
        &self.collections
    }

    pub fn set_collections(&mut self, collections: ProjectCollections) {
        self.collections = collections;
    }

    /// Read the local mirror. A missing or unparseable mirror yields
    /// empty collections; the parse failure is logged, not surfaced.
    pub fn load(&mut self) -> Vec<Toast> {
        let mut toasts = Vec::new();
        match self.mirror.read(MIRROR_KEY) {
            Ok(Some(text)) => match serde_json::from_str::<ProjectCollections>(&text) {
                Ok(collections) => self.collections = collections,
                Err(e) => {
                    warn!("Stored project record is unreadable, starting empty: {e}");
                    self.collections = ProjectCollections::default();
                }
            },
            Ok(None) => self.collections = ProjectCollections::default(),
            Err(e) => {
                warn!("Local mirror unavailable: {e}");
                toasts.push(Toast::error(format!("Could not read saved projects: {e}")));
                self.collections = ProjectCollections::default();
            }
        }
        toasts
    }

    /// Persist the working copy: local mirror first, then the advisory
    /// remote push. Either half may fail without reverting the in-memory
    /// state; failures come back as toasts.
    pub fn persist(&mut self) -> Vec<Toast> {
        let mut toasts = Vec::new();
        match serde_json::to_string_pretty(&self.collections) {
            Ok(text) => {
                if let Err(e) = self.mirror.write(MIRROR_KEY, &text) {
                    warn!("Local mirror write failed: {e}");
                    toasts.push(Toast::error(format!("Could not save projects locally: {e}")));
                }
            }
            Err(e) => {
                warn!("Could not serialize project record: {e}");
                toasts.push(Toast::error(format!("Could not serialize projects: {e}")));
            }
        }
        if let Err(e) = self.remote.upsert(&self.collections) {
            warn!("Remote project upsert failed: {e}");
            toasts.push(Toast::error(format!("Server sync failed: {e}")));
        }
        toasts
    }

    /// Linear search across the three collections.
    pub fn find(&self, id: &str) -> Option<Project> {
        if let Some(d) = self.collections.datasets.iter().find(|d| d.id == id) {
            return Some(Project::Dataset(d.clone()));
        }
        if let Some(c) = self.collections.categories.iter().find(|c| c.id == id) {
            return Some(Project::Category(c.clone()));
        }
        if let Some(f) = self.collections.featurelayers.iter().find(|f| f.id == id) {
            return Some(Project::FeatureLayer(f.clone()));
        }
        None
    }

    /// Ids of Categories and FeatureLayers that reference `id`.
    pub fn find_referrers(&self, id: &str) -> Vec<String> {
        let mut referrers = Vec::new();
        for category in &self.collections.categories {
            if category.datasets.iter().any(|d| d == id) {
                referrers.push(category.id.clone());
            }
        }
        for layer in &self.collections.featurelayers {
            if layer.categories.iter().any(|c| c == id) {
                referrers.push(layer.id.clone());
            }
        }
        referrers
    }

    /// Validate, prune dangling references, replace any entity with the
    /// same id, and persist. Dangling references are skipped silently at
    /// the record level and reported as a warning toast.
    pub fn save_project(&mut self, mut project: Project) -> Result<Vec<Toast>, EditorError> {
        let mut toasts = Vec::new();
        let warnings = validate_for_save(&project)?;
        for warning in warnings {
            toasts.push(Toast::info(warning));
        }

        let dangling = self.prune_dangling(&mut project);
        if !dangling.is_empty() {
            toasts.push(Toast::error(format!(
                "Dropped missing references: {}",
                dangling.join(", ")
            )));
        }

        match project {
            Project::Dataset(dataset) => {
                self.collections.datasets.retain(|d| d.id != dataset.id);
                self.collections.datasets.push(dataset);
            }
            Project::Category(category) => {
                self.collections.categories.retain(|c| c.id != category.id);
                self.collections.categories.push(category);
            }
            Project::FeatureLayer(layer) => {
                self.collections.featurelayers.retain(|f| f.id != layer.id);
                self.collections.featurelayers.push(layer);
            }
        }

        toasts.extend(self.persist());
        Ok(toasts)
    }

    /// Drop references to ids that no longer resolve. Categories may only
    /// point at Datasets and FeatureLayers only at Categories, so a
    /// reference resolving to the wrong kind counts as dangling too.
    fn prune_dangling(&self, project: &mut Project) -> Vec<String> {
        let mut dropped = Vec::new();
        match project {
            Project::Dataset(_) => {}
            Project::Category(category) => {
                let missing: Vec<String> = category
                    .datasets
                    .iter()
                    .filter(|id| !self.collections.datasets.iter().any(|d| &d.id == *id))
                    .cloned()
                    .collect();
                for id in missing {
                    category.remove_dataset(&id);
                    dropped.push(id);
                }
            }
            Project::FeatureLayer(layer) => {
                let missing: Vec<String> = layer
                    .categories
                    .iter()
                    .filter(|id| !self.collections.categories.iter().any(|c| &c.id == *id))
                    .cloned()
                    .collect();
                for id in missing {
                    layer.remove_category(&id);
                    dropped.push(id);
                }
            }
        }
        dropped
    }

    /// Remove an entity by id, cascade the removal through every
    /// referrer's reference list and weight map (renormalizing each), and
    /// persist.
    pub fn remove(&mut self, id: &str) -> Vec<Toast> {
        let mut toasts = Vec::new();
        let existed = self.find(id).is_some();
        if !existed {
            toasts.push(Toast::info(format!("Project '{id}' was not found")));
            return toasts;
        }

        self.collections.datasets.retain(|d| d.id != id);
        self.collections.categories.retain(|c| c.id != id);
        self.collections.featurelayers.retain(|f| f.id != id);

        for category in &mut self.collections.categories {
            category.remove_dataset(id);
        }
        for layer in &mut self.collections.featurelayers {
            layer.remove_category(id);
        }

        toasts.extend(self.persist());
        toasts.push(Toast::success(format!("Project '{id}' deleted")));
        toasts
    }
}
