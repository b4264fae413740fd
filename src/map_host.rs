use crate::{error::EditorError, toast::Toast};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapMode {
    Regular,
    Weighted,
}

/// Rendering configuration passed through to the map host unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapConfig {
    /// Fraction of the data to sample, in (0, 1].
    pub data_fraction: f64,
    pub geometry_types: Vec<String>,
    pub show_unavailable: bool,
    pub map_style: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            data_fraction: 1.0,
            geometry_types: Vec::new(),
            show_unavailable: false,
            map_style: "carto-positron".to_string(),
        }
    }
}

/// The request descriptor for `/generate_map`. The core never interprets
/// `filters`; it belongs to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapRequest {
    pub mode: MapMode,
    #[serde(default)]
    pub filters: Value,
    pub display_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_type: Option<String>,
    pub config: MapConfig,
}

/// Opaque figure description returned by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Figure {
    pub data: Value,
    pub layout: Value,
}

/// Filter options for one map mode, from `/get_options`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapOptions {
    pub states: Vec<String>,
    pub datasets: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OptionsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    options: MapOptions,
    #[serde(default)]
    error: Option<String>,
}

/// Collaborator contract: accept a request descriptor, return a figure.
pub trait MapHost {
    fn render(&self, request: &MapRequest) -> Result<Figure, EditorError>;
    fn fetch_options(&self, mode: MapMode) -> Result<MapOptions, EditorError>;
}

/// HTTP implementation posting to `/generate_map` and `/get_options`,
/// with the catalog listing endpoints alongside.
pub struct HttpMapHost {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpMapHost {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::blocking::Client::new(),
        }
    }

    fn get_string_list(&self, path_and_query: &str) -> Result<Vec<String>, EditorError> {
        let url = format!("{}{path_and_query}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| EditorError::transport(format!("Could not reach '{url}': {e}")))?;
        response
            .json()
            .map_err(|e| EditorError::data_shape(format!("Unreadable list from '{url}': {e}")))
    }

    pub fn list_states(&self) -> Result<Vec<String>, EditorError> {
        self.get_string_list("/list_states")
    }

    pub fn list_counties(&self, state: &str) -> Result<Vec<String>, EditorError> {
        self.get_string_list(&format!("/list_counties?state={state}"))
    }

    pub fn list_categories(&self, state: &str, county: &str) -> Result<Vec<String>, EditorError> {
        self.get_string_list(&format!("/list_categories?state={state}&county={county}"))
    }

    pub fn list_datasets(
        &self,
        state: &str,
        county: &str,
        category: &str,
    ) -> Result<Vec<String>, EditorError> {
        self.get_string_list(&format!(
            "/list_datasets?state={state}&county={county}&category={category}"
        ))
    }
}

impl MapHost for HttpMapHost {
    fn render(&self, request: &MapRequest) -> Result<Figure, EditorError> {
        let url = format!("{}/generate_map", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .map_err(|e| EditorError::transport(format!("Could not reach '{url}': {e}")))?;
        if !response.status().is_success() {
            return Err(EditorError::transport(format!(
                "Map generation failed: HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .map_err(|e| EditorError::data_shape(format!("Unreadable figure response: {e}")))
    }

    fn fetch_options(&self, mode: MapMode) -> Result<MapOptions, EditorError> {
        let url = format!("{}/get_options", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "mode": mode }))
            .send()
            .map_err(|e| EditorError::transport(format!("Could not reach '{url}': {e}")))?;
        let parsed: OptionsResponse = response
            .json()
            .map_err(|e| EditorError::data_shape(format!("Unreadable options response: {e}")))?;
        if !parsed.success {
            return Err(EditorError::transport(format!(
                "Options fetch failed: {}",
                parsed.error.unwrap_or_else(|| "no error message".to_string())
            )));
        }
        Ok(parsed.options)
    }
}

/// What happened to a submit attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MapSubmitOutcome {
    Rendered,
    /// A request was already in flight; the attempt was dropped, not
    /// queued.
    Ignored,
}

/// The map request pipeline. Enforces at-most-one in-flight request and
/// caches the last figure so base-style changes can be applied as a
/// layout-only patch without a re-request.
pub struct MapSession {
    host: Box<dyn MapHost>,
    pending: bool,
    figure: Option<Figure>,
}

impl MapSession {
    pub fn new(host: Box<dyn MapHost>) -> Self {
        Self {
            host,
            pending: false,
            figure: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn figure(&self) -> Option<&Figure> {
        self.figure.as_ref()
    }

    /// Mark a request as in flight. Returns false when one already is,
    /// in which case the caller must drop its attempt.
    pub fn try_begin(&mut self) -> bool {
        if self.pending {
            return false;
        }
        self.pending = true;
        true
    }

    /// Re-arm submission; called on both success and failure.
    pub fn finish(&mut self) {
        self.pending = false;
    }

    /// Submit a request unless one is already pending. In-flight requests
    /// are not cancellable; failure re-enables submission and surfaces a
    /// toast through the returned error.
    pub fn submit(&mut self, request: &MapRequest) -> Result<(MapSubmitOutcome, Vec<Toast>), EditorError> {
        if !self.try_begin() {
            info!("Map request dropped: another request is in flight");
            return Ok((
                MapSubmitOutcome::Ignored,
                vec![Toast::info("A map request is already running")],
            ));
        }
        let result = self.host.render(request);
        self.finish();
        match result {
            Ok(figure) => {
                self.figure = Some(figure);
                Ok((MapSubmitOutcome::Rendered, Vec::new()))
            }
            Err(e) => {
                warn!("Map request failed: {e}");
                Err(e)
            }
        }
    }

    /// Live-switch the base map style on the cached figure. This is a
    /// layout patch, not a request, so it never touches the latch.
    pub fn apply_style(&mut self, style: &str) -> bool {
        let Some(figure) = self.figure.as_mut() else {
            return false;
        };
        if !figure.layout.is_object() {
            figure.layout = json!({});
        }
        if let Some(layout) = figure.layout.as_object_mut() {
            let mapbox = layout
                .entry("mapbox".to_string())
                .or_insert_with(|| json!({}));
            if !mapbox.is_object() {
                *mapbox = json!({});
            }
            if let Some(mapbox) = mapbox.as_object_mut() {
                mapbox.insert("style".to_string(), Value::String(style.to_string()));
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixtureHost {
        figure: Figure,
    }

    impl MapHost for FixtureHost {
        fn render(&self, _request: &MapRequest) -> Result<Figure, EditorError> {
            Ok(self.figure.clone())
        }

        fn fetch_options(&self, _mode: MapMode) -> Result<MapOptions, EditorError> {
            Ok(MapOptions::default())
        }
    }

    struct FailingHost;

    impl MapHost for FailingHost {
        fn render(&self, _request: &MapRequest) -> Result<Figure, EditorError> {
            Err(EditorError::transport("host down"))
        }

        fn fetch_options(&self, _mode: MapMode) -> Result<MapOptions, EditorError> {
            Err(EditorError::transport("host down"))
        }
    }

    fn request() -> MapRequest {
        MapRequest {
            mode: MapMode::Regular,
            filters: json!({}),
            display_method: "markers".to_string(),
            weight_type: None,
            config: MapConfig::default(),
        }
    }

    #[test]
    fn submit_caches_the_figure() {
        let mut session = MapSession::new(Box::new(FixtureHost {
            figure: Figure {
                data: json!([]),
                layout: json!({"mapbox": {"style": "carto-positron"}}),
            },
        }));
        let (outcome, toasts) = session.submit(&request()).unwrap();
        assert_eq!(outcome, MapSubmitOutcome::Rendered);
        assert!(toasts.is_empty());
        assert!(session.figure().is_some());
    }

    #[test]
    fn second_submit_while_pending_is_ignored_not_queued() {
        let mut session = MapSession::new(Box::new(FixtureHost {
            figure: Figure::default(),
        }));
        assert!(session.try_begin());
        let (outcome, toasts) = session.submit(&request()).unwrap();
        assert_eq!(outcome, MapSubmitOutcome::Ignored);
        assert_eq!(toasts.len(), 1);
        // Completion re-arms submission.
        session.finish();
        let (outcome, _) = session.submit(&request()).unwrap();
        assert_eq!(outcome, MapSubmitOutcome::Rendered);
    }

    #[test]
    fn failure_re_arms_submission() {
        let mut session = MapSession::new(Box::new(FailingHost));
        assert!(session.submit(&request()).is_err());
        assert!(!session.is_pending());
    }

    #[test]
    fn style_switch_patches_layout_without_a_request() {
        let mut session = MapSession::new(Box::new(FixtureHost {
            figure: Figure {
                data: json!([{"type": "scattermapbox"}]),
                layout: json!({"mapbox": {"style": "carto-positron"}}),
            },
        }));
        session.submit(&request()).unwrap();
        assert!(session.apply_style("open-street-map"));
        let figure = session.figure().unwrap();
        assert_eq!(figure.layout["mapbox"]["style"], "open-street-map");
        // Data is untouched by a style patch.
        assert_eq!(figure.data[0]["type"], "scattermapbox");
    }

    #[test]
    fn style_switch_without_a_figure_is_a_no_op() {
        let mut session = MapSession::new(Box::new(FixtureHost {
            figure: Figure::default(),
        }));
        assert!(!session.apply_style("open-street-map"));
    }

    #[test]
    fn request_descriptor_serializes_with_camel_case_config() {
        let value = serde_json::to_value(request()).unwrap();
        assert_eq!(value["mode"], "regular");
        assert!(value["config"]["dataFraction"].is_number());
        assert!(value["config"].get("showUnavailable").is_some());
        assert!(value.get("weight_type").is_none());
    }
}
