use crate::{
    error::EditorError,
    feature::{Feature, FeatureCollection},
    field_inference::FieldType,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs};
use tracing::info;

/// Where a Dataset's features come from. All four kinds resolve to the
/// same response shape; the core is blind to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataSource {
    File { path: String },
    BuiltIn { api_id: String },
    UserApi { api_id: String },
    Url { url: String },
}

/// Features plus the optional field-type hints the source carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadedData {
    pub features: Vec<Feature>,
    pub field_type_hints: HashMap<String, FieldType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WireData {
    #[serde(default)]
    features: Option<Vec<Feature>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WireFieldInfo {
    #[serde(default)]
    field_types: HashMap<String, FieldType>,
}

/// `{success, data: {features}, field_info: {field_types}}` or
/// `{success: false, error}`.
#[derive(Debug, Clone, Default, Deserialize)]
struct WireResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<WireData>,
    #[serde(default)]
    field_info: Option<WireFieldInfo>,
    #[serde(default)]
    error: Option<String>,
}

/// Decode a gateway response body into loaded data. A `success: false`
/// body is a Transport failure; a success body without features is a
/// DataShape failure.
pub fn parse_gateway_response(text: &str) -> Result<LoadedData, EditorError> {
    let response: WireResponse = serde_json::from_str(text)
        .map_err(|e| EditorError::data_shape(format!("Unreadable gateway response: {e}")))?;
    if !response.success {
        let reason = response
            .error
            .unwrap_or_else(|| "no error message supplied".to_string());
        return Err(EditorError::transport(format!("Data source failed: {reason}")));
    }
    let features = response
        .data
        .and_then(|d| d.features)
        .ok_or_else(|| EditorError::data_shape("Gateway response is missing 'data.features'"))?;
    let field_type_hints = response
        .field_info
        .map(|info| info.field_types)
        .unwrap_or_default();
    Ok(LoadedData {
        features,
        field_type_hints,
    })
}

/// Collaborator contract: resolve a data source into features and hints.
pub trait DataSourceGateway {
    fn load(&self, source: &DataSource, limit: Option<usize>) -> Result<LoadedData, EditorError>;
}

/// A registered user endpoint from the API catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEntry {
    pub id: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ApiListResponse {
    #[serde(default)]
    apis: Vec<ApiEntry>,
}

#[derive(Serialize)]
struct LoadFromApiBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    api_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
}

/// HTTP implementation of the gateway. Built-in, user-registered and raw
/// URL sources go through `/json-editor/api/load_from_api`; file sources
/// are read from the local filesystem.
pub struct HttpGateway {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::blocking::Client::new(),
        }
    }

    fn load_from_api(
        &self,
        api_id: Option<&str>,
        url: Option<&str>,
        limit: Option<usize>,
    ) -> Result<LoadedData, EditorError> {
        let endpoint = format!("{}/json-editor/api/load_from_api", self.base_url);
        let body = LoadFromApiBody { api_id, url, limit };
        let response = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .map_err(|e| EditorError::transport(format!("Could not reach '{endpoint}': {e}")))?;
        let text = response
            .text()
            .map_err(|e| EditorError::transport(format!("Could not read gateway response: {e}")))?;
        parse_gateway_response(&text)
    }

    fn load_file(path: &str) -> Result<LoadedData, EditorError> {
        let text = fs::read_to_string(path)
            .map_err(|e| EditorError::io(format!("Could not read file '{path}': {e}")))?;
        // A local file may be a wrapped gateway response or plain GeoJSON.
        if let Ok(data) = parse_gateway_response(&text) {
            return Ok(data);
        }
        let collection: FeatureCollection = serde_json::from_str(&text)
            .map_err(|e| EditorError::data_shape(format!("'{path}' is not GeoJSON: {e}")))?;
        Ok(LoadedData {
            features: collection.features,
            field_type_hints: HashMap::new(),
        })
    }

    /// GET `/json-editor/api/apis`.
    pub fn list_apis(&self) -> Result<Vec<ApiEntry>, EditorError> {
        let endpoint = format!("{}/json-editor/api/apis", self.base_url);
        let response = self
            .client
            .get(&endpoint)
            .send()
            .map_err(|e| EditorError::transport(format!("Could not reach '{endpoint}': {e}")))?;
        let list: ApiListResponse = response
            .json()
            .map_err(|e| EditorError::data_shape(format!("Unreadable API catalog: {e}")))?;
        Ok(list.apis)
    }

    /// POST `/json-editor/api/apis`.
    pub fn register_api(&self, entry: &ApiEntry) -> Result<(), EditorError> {
        let endpoint = format!("{}/json-editor/api/apis", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(entry)
            .send()
            .map_err(|e| EditorError::transport(format!("Could not reach '{endpoint}': {e}")))?;
        if !response.status().is_success() {
            return Err(EditorError::transport(format!(
                "API registration failed: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl DataSourceGateway for HttpGateway {
    fn load(&self, source: &DataSource, limit: Option<usize>) -> Result<LoadedData, EditorError> {
        info!("Loading data source {source:?}");
        match source {
            DataSource::File { path } => Self::load_file(path),
            DataSource::BuiltIn { api_id } | DataSource::UserApi { api_id } => {
                self.load_from_api(Some(api_id), None, limit)
            }
            DataSource::Url { url } => self.load_from_api(None, Some(url), limit),
        }
    }
}

/// Gateway that serves one canned payload; used in tests and demos.
#[derive(Debug, Clone, Default)]
pub struct StaticGateway {
    pub data: LoadedData,
}

impl StaticGateway {
    pub fn new(data: LoadedData) -> Self {
        Self { data }
    }
}

impl DataSourceGateway for StaticGateway {
    fn load(&self, _source: &DataSource, limit: Option<usize>) -> Result<LoadedData, EditorError> {
        let mut data = self.data.clone();
        if let Some(limit) = limit {
            data.features.truncate(limit);
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn parses_successful_response_with_hints() {
        let body = r#"{
            "success": true,
            "data": {"features": [{"properties": {"a": 1}}]},
            "field_info": {"field_types": {"a": "quantitative"}}
        }"#;
        let data = parse_gateway_response(body).unwrap();
        assert_eq!(data.features.len(), 1);
        assert_eq!(data.field_type_hints["a"], FieldType::Quantitative);
    }

    #[test]
    fn failure_response_is_a_transport_error() {
        let body = r#"{"success": false, "error": "upstream 503"}"#;
        let err = parse_gateway_response(body).unwrap_err();
        assert_eq!(err.code, ErrorCode::Transport);
        assert!(err.message.contains("upstream 503"));
    }

    #[test]
    fn missing_features_is_a_data_shape_error() {
        let body = r#"{"success": true, "data": {}}"#;
        let err = parse_gateway_response(body).unwrap_err();
        assert_eq!(err.code, ErrorCode::DataShape);
    }

    #[test]
    fn static_gateway_honors_the_limit() {
        let data = LoadedData {
            features: vec![Feature::default(), Feature::default(), Feature::default()],
            field_type_hints: HashMap::new(),
        };
        let gateway = StaticGateway::new(data);
        let loaded = gateway
            .load(
                &DataSource::Url {
                    url: "https://example.test/data.json".to_string(),
                },
                Some(2),
            )
            .unwrap();
        assert_eq!(loaded.features.len(), 2);
    }
}
