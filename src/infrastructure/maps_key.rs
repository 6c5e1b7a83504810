use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;

/// Supplies the credential that parameterises the maps embed URL. An empty
/// string means no key is configured.
#[async_trait]
pub trait MapsKeySource: Send + Sync {
    async fn fetch_key(&self) -> Result<String, InfraError>;
}

/// Reads `{"apiKey": "..."}` from a key-retrieval endpoint.
#[derive(Debug, Clone)]
pub struct ReqwestMapsKeyClient {
    client: Client,
    endpoint: String,
}

impl ReqwestMapsKeyClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct MapsKeyPayload {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
}

#[async_trait]
impl MapsKeySource for ReqwestMapsKeyClient {
    async fn fetch_key(&self) -> Result<String, InfraError> {
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|error| InfraError::Http(format!("network error while fetching maps key: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Http(format!("failed reading maps key response: {error}")))?;
        if !status.is_success() {
            return Err(InfraError::Http(format!(
                "maps key endpoint error: http {}",
                status.as_u16()
            )));
        }

        parse_key_payload(&body)
    }
}

/// A key fixed at startup from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticMapsKey {
    api_key: String,
}

impl StaticMapsKey {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl MapsKeySource for StaticMapsKey {
    async fn fetch_key(&self) -> Result<String, InfraError> {
        Ok(self.api_key.trim().to_string())
    }
}

fn parse_key_payload(body: &str) -> Result<String, InfraError> {
    let parsed: MapsKeyPayload = serde_json::from_str(body)
        .map_err(|error| InfraError::Http(format!("invalid maps key payload: {error}")))?;
    Ok(parsed
        .api_key
        .map(|value| value.trim().to_string())
        .unwrap_or_default())
}
