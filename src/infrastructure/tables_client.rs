use crate::infrastructure::auth_client::normalize_base_url;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use url::Url;

pub const OWNER_COLUMN: &str = "user_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectRequest {
    pub table: &'static str,
    pub owner_id: String,
    pub order_by: Option<(&'static str, SortDirection)>,
}

/// Row-oriented access to the hosted tables. Every call is scoped by the
/// owner column and authorised by the session's access token.
#[async_trait]
pub trait TablesClient: Send + Sync {
    async fn select(&self, access_token: &str, request: SelectRequest) -> Result<Vec<Value>, InfraError>;

    async fn insert(&self, access_token: &str, table: &'static str, row: Value) -> Result<Vec<Value>, InfraError>;

    async fn update(
        &self,
        access_token: &str,
        table: &'static str,
        owner_id: &str,
        row_id: &str,
        patch: Value,
    ) -> Result<(), InfraError>;

    async fn delete(
        &self,
        access_token: &str,
        table: &'static str,
        owner_id: &str,
        row_id: &str,
    ) -> Result<(), InfraError>;
}

/// PostgREST-compatible client for `/rest/v1/<table>`.
#[derive(Debug, Clone)]
pub struct ReqwestTablesClient {
    client: Client,
    base_url: Url,
    anon_key: String,
}

impl ReqwestTablesClient {
    pub fn new(base_url: &str, anon_key: impl Into<String>) -> Result<Self, InfraError> {
        Ok(Self {
            client: Client::new(),
            base_url: normalize_base_url(base_url)?,
            anon_key: anon_key.into(),
        })
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Validation(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn table_endpoint(&self, table: &str) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("backend URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("rest");
            segments.push("v1");
            segments.push(table);
        }
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder, access_token: &str) -> RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<String, InfraError> {
        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Http(format!("network error while {action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Http(format!("failed reading response while {action}: {error}")))?;

        if !status.is_success() {
            let message = if body.trim().is_empty() {
                format!("tables api error while {action}: http {}", status.as_u16())
            } else {
                format!("tables api error while {action}: http {}; body={body}", status.as_u16())
            };
            return Err(InfraError::Http(message));
        }
        Ok(body)
    }

    fn parse_rows(body: &str, action: &str) -> Result<Vec<Value>, InfraError> {
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let parsed: Value = serde_json::from_str(body).map_err(|error| {
            InfraError::Http(format!("invalid rows payload while {action}: {error}; body={body}"))
        })?;
        match parsed {
            Value::Array(rows) => Ok(rows),
            Value::Object(_) => Ok(vec![parsed]),
            _ => Err(InfraError::Http(format!(
                "unexpected rows payload while {action}: {body}"
            ))),
        }
    }
}

pub(crate) fn eq_filter(value: &str) -> String {
    format!("eq.{value}")
}

pub(crate) fn order_param(column: &str, direction: SortDirection) -> String {
    match direction {
        SortDirection::Ascending => format!("{column}.asc"),
        SortDirection::Descending => format!("{column}.desc"),
    }
}

#[async_trait]
impl TablesClient for ReqwestTablesClient {
    async fn select(&self, access_token: &str, request: SelectRequest) -> Result<Vec<Value>, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(&request.owner_id, "owner id")?;

        let action = format!("listing {}", request.table);
        let endpoint = self.table_endpoint(request.table)?;
        let mut req = self
            .authorized(self.client.get(endpoint), access_token)
            .query(&[("select", "*".to_string()), (OWNER_COLUMN, eq_filter(&request.owner_id))]);
        if let Some((column, direction)) = request.order_by {
            req = req.query(&[("order", order_param(column, direction))]);
        }

        let body = self.send(req, &action).await?;
        Self::parse_rows(&body, &action)
    }

    async fn insert(&self, access_token: &str, table: &'static str, row: Value) -> Result<Vec<Value>, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;

        let action = format!("inserting into {table}");
        let endpoint = self.table_endpoint(table)?;
        let req = self
            .authorized(self.client.post(endpoint), access_token)
            .header("Prefer", "return=representation")
            .json(&Value::Array(vec![row]));

        let body = self.send(req, &action).await?;
        Self::parse_rows(&body, &action)
    }

    async fn update(
        &self,
        access_token: &str,
        table: &'static str,
        owner_id: &str,
        row_id: &str,
        patch: Value,
    ) -> Result<(), InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(owner_id, "owner id")?;
        Self::ensure_non_empty(row_id, "row id")?;

        let action = format!("updating {table}");
        let endpoint = self.table_endpoint(table)?;
        let req = self
            .authorized(self.client.patch(endpoint), access_token)
            .query(&[("id", eq_filter(row_id)), (OWNER_COLUMN, eq_filter(owner_id))])
            .json(&patch);

        self.send(req, &action).await?;
        Ok(())
    }

    async fn delete(
        &self,
        access_token: &str,
        table: &'static str,
        owner_id: &str,
        row_id: &str,
    ) -> Result<(), InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(owner_id, "owner id")?;
        Self::ensure_non_empty(row_id, "row id")?;

        let action = format!("deleting from {table}");
        let endpoint = self.table_endpoint(table)?;
        let req = self
            .authorized(self.client.delete(endpoint), access_token)
            .query(&[("id", eq_filter(row_id)), (OWNER_COLUMN, eq_filter(owner_id))]);

        self.send(req, &action).await?;
        Ok(())
    }
}
