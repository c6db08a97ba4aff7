// Control panel client
// Talks to the panel's client API with a bearer token and parses every
// response into an explicit schema before handing it to callers.

use super::{CommandReceipt, ControllerError, GameServerController, PowerSignal, ServerRunState};
use crate::config::PanelConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

/// `GET client/servers/{id}/resources`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerResources {
    pub object: String,
    pub attributes: ResourceAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAttributes {
    pub current_state: String,
    #[serde(default)]
    pub is_suspended: bool,
    pub resources: ResourceUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_bytes: u64,
    pub cpu_absolute: f64,
    pub disk_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

impl ServerResources {
    pub fn run_state(&self) -> ServerRunState {
        ServerRunState::from(self.attributes.current_state.as_str())
    }

    fn validate(self) -> Result<Self, ControllerError> {
        if self.attributes.current_state.trim().is_empty() {
            return Err(ControllerError::Parse(
                "resources response has an empty current_state".to_string(),
            ));
        }
        Ok(self)
    }
}

/// `GET client/servers/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDetails {
    pub object: String,
    pub attributes: ServerDetailsAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDetailsAttributes {
    pub identifier: String,
    pub uuid: String,
    pub name: String,
    pub node: String,
    #[serde(default)]
    pub description: String,
    pub sftp_details: SftpDetails,
    #[serde(default)]
    pub is_suspended: bool,
    #[serde(default)]
    pub is_installing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SftpDetails {
    pub ip: String,
    pub port: u16,
}

/// Parse a panel response body into `T`
pub fn parse_payload<T: DeserializeOwned>(body: &str) -> Result<T, ControllerError> {
    serde_json::from_str(body).map_err(|e| ControllerError::Parse(e.to_string()))
}

/// Parse and validate a resources payload
pub fn parse_resources(body: &str) -> Result<ServerResources, ControllerError> {
    parse_payload::<ServerResources>(body)?.validate()
}

/// HTTP client for a single server on the panel
#[derive(Clone)]
pub struct PanelClient {
    http: reqwest::Client,
    base_url: Url,
    server_id: String,
}

impl PanelClient {
    pub fn new(config: &PanelConfig) -> Result<Self, ControllerError> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| ControllerError::InvalidUrl(format!("Invalid API key header: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ControllerError::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: normalize_base_url(&config.base_url)?,
            server_id: config.server_id.clone(),
        })
    }

    /// Absolute URL for a path below `client/servers/{id}`
    pub fn endpoint(&self, suffix: &str) -> Result<Url, ControllerError> {
        let path = if suffix.is_empty() {
            format!("client/servers/{}", self.server_id)
        } else {
            format!("client/servers/{}/{}", self.server_id, suffix)
        };
        self.base_url
            .join(&path)
            .map_err(|e| ControllerError::InvalidUrl(format!("{}: {}", path, e)))
    }

    async fn get_body(&self, suffix: &str) -> Result<String, ControllerError> {
        let url = self.endpoint(suffix)?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ControllerError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControllerError::Status {
                endpoint: url.path().to_string(),
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| ControllerError::Http(format!("Failed to read body: {}", e)))
    }

    async fn post(
        &self,
        suffix: &str,
        payload: serde_json::Value,
    ) -> Result<(StatusCode, String), ControllerError> {
        let url = self.endpoint(suffix)?;
        let response = self
            .http
            .post(url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ControllerError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControllerError::Status {
                endpoint: url.path().to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ControllerError::Http(format!("Failed to read body: {}", e)))?;
        Ok((status, body))
    }

    /// Server details, including the SFTP endpoint the panel advertises
    #[instrument(skip(self), fields(server_id = %self.server_id))]
    pub async fn server_details(&self) -> Result<ServerDetails, ControllerError> {
        let body = self.get_body("").await?;
        let details: ServerDetails = parse_payload(&body)?;
        debug!(name = %details.attributes.name, "Fetched server details");
        Ok(details)
    }

    /// Run state and live resource usage
    #[instrument(skip(self), fields(server_id = %self.server_id))]
    pub async fn resources(&self) -> Result<ServerResources, ControllerError> {
        let body = self.get_body("resources").await?;
        let resources = parse_resources(&body)?;
        debug!(state = %resources.attributes.current_state, "Fetched server resources");
        Ok(resources)
    }
}

#[async_trait]
impl GameServerController for PanelClient {
    async fn run_state(&self) -> Result<ServerRunState, ControllerError> {
        Ok(self.resources().await?.run_state())
    }

    #[instrument(skip(self), fields(server_id = %self.server_id))]
    async fn send_command(&self, command: &str) -> Result<CommandReceipt, ControllerError> {
        let (status, body) = self.post("command", json!({ "command": command })).await?;
        debug!(status = status.as_u16(), "Console command sent");
        Ok(CommandReceipt {
            status: status.as_u16(),
            body,
        })
    }

    #[instrument(skip(self), fields(server_id = %self.server_id))]
    async fn set_power(&self, signal: PowerSignal) -> Result<bool, ControllerError> {
        let (status, _) = self.post("power", json!({ "signal": signal })).await?;
        debug!(status = status.as_u16(), "Power signal sent");
        Ok(status == StatusCode::NO_CONTENT)
    }
}

// Url::join drops the last path segment unless the base ends with '/'
fn normalize_base_url(raw: &str) -> Result<Url, ControllerError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    Url::parse(&with_slash).map_err(|e| ControllerError::InvalidUrl(format!("{}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> PanelClient {
        PanelClient::new(&PanelConfig {
            base_url: base_url.to_string(),
            api_key: "ptlc_test".to_string(),
            server_id: "1a2b3c".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let with_slash = client("https://panel.example.net/api/");
        let without_slash = client("https://panel.example.net/api");

        for client in [with_slash, without_slash] {
            assert_eq!(
                client.endpoint("resources").unwrap().as_str(),
                "https://panel.example.net/api/client/servers/1a2b3c/resources"
            );
            assert_eq!(
                client.endpoint("").unwrap().as_str(),
                "https://panel.example.net/api/client/servers/1a2b3c"
            );
        }
    }

    #[test]
    fn test_invalid_base_url() {
        let result = PanelClient::new(&PanelConfig {
            base_url: "not a url".to_string(),
            api_key: "k".to_string(),
            server_id: "s".to_string(),
        });
        assert!(matches!(result, Err(ControllerError::InvalidUrl(_))));
    }
}
