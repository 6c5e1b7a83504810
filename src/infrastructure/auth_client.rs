use crate::domain::models::SessionUser;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

#[derive(Debug, Clone)]
pub struct PasswordCredentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct SignUpRequest {
    pub credentials: PasswordCredentials,
    pub email_redirect_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub token_type: Option<String>,
    pub user: SessionUser,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpResponse {
    /// The service auto-confirmed the account and opened a session.
    Session(AuthTokenResponse),
    /// A confirmation email was sent; no session yet.
    ConfirmationSent(SessionUser),
}

#[async_trait]
pub trait AuthHttpClient: Send + Sync {
    async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpResponse, InfraError>;

    async fn sign_in_with_password(
        &self,
        credentials: PasswordCredentials,
    ) -> Result<AuthTokenResponse, InfraError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthTokenResponse, InfraError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), InfraError>;
}

/// GoTrue-compatible auth endpoints of the hosted backend.
#[derive(Debug, Clone)]
pub struct ReqwestAuthClient {
    client: Client,
    base_url: Url,
    anon_key: String,
}

#[derive(Debug, serde::Deserialize)]
struct UserPayload {
    id: String,
    email: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct TokenPayload {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    user: Option<UserPayload>,
    id: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct ErrorPayload {
    error: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
}

#[derive(Debug, serde::Serialize)]
struct CredentialsBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, serde::Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

impl ReqwestAuthClient {
    pub fn new(base_url: &str, anon_key: impl Into<String>) -> Result<Self, InfraError> {
        Ok(Self {
            client: Client::new(),
            base_url: normalize_base_url(base_url)?,
            anon_key: anon_key.into(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, InfraError> {
        self.base_url
            .join(path)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid auth endpoint {path}: {error}")))
    }

    async fn post_json<B: serde::Serialize + ?Sized>(
        &self,
        endpoint: Url,
        body: &B,
        bearer: Option<&str>,
    ) -> Result<String, InfraError> {
        let mut request = self
            .client
            .post(endpoint)
            .header("apikey", &self.anon_key)
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Http(format!("network error while calling auth service: {error}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Http(format!("failed reading auth response: {error}")))?;

        if !status.is_success() {
            return Err(auth_http_error(status, &body));
        }
        Ok(body)
    }

    async fn token_request(&self, endpoint: Url, body: &impl serde::Serialize) -> Result<AuthTokenResponse, InfraError> {
        let body = self.post_json(endpoint, body, None).await?;
        let parsed: TokenPayload = serde_json::from_str(&body)
            .map_err(|error| InfraError::Http(format!("invalid token payload: {error}; body={body}")))?;
        token_from_payload(parsed)?
            .ok_or_else(|| InfraError::Http("token response did not include an access token".to_string()))
    }
}

#[async_trait]
impl AuthHttpClient for ReqwestAuthClient {
    async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpResponse, InfraError> {
        let mut endpoint = self.endpoint("auth/v1/signup")?;
        if let Some(redirect) = request.email_redirect_to.as_deref() {
            endpoint.query_pairs_mut().append_pair("redirect_to", redirect);
        }
        let body = self
            .post_json(
                endpoint,
                &CredentialsBody {
                    email: &request.credentials.email,
                    password: &request.credentials.password,
                },
                None,
            )
            .await?;

        let parsed: TokenPayload = serde_json::from_str(&body)
            .map_err(|error| InfraError::Http(format!("invalid sign-up payload: {error}; body={body}")))?;
        let top_level_user = parsed.id.clone().map(|id| SessionUser {
            id,
            email: parsed.email.clone(),
        });
        let nested_user = parsed.user.as_ref().map(|user| SessionUser {
            id: user.id.clone(),
            email: user.email.clone(),
        });

        if let Some(token) = token_from_payload(parsed)? {
            return Ok(SignUpResponse::Session(token));
        }
        nested_user
            .or(top_level_user)
            .map(SignUpResponse::ConfirmationSent)
            .ok_or_else(|| InfraError::Http("sign-up response did not include a user".to_string()))
    }

    async fn sign_in_with_password(
        &self,
        credentials: PasswordCredentials,
    ) -> Result<AuthTokenResponse, InfraError> {
        let mut endpoint = self.endpoint("auth/v1/token")?;
        endpoint.query_pairs_mut().append_pair("grant_type", "password");
        self.token_request(
            endpoint,
            &CredentialsBody {
                email: &credentials.email,
                password: &credentials.password,
            },
        )
        .await
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<AuthTokenResponse, InfraError> {
        let mut endpoint = self.endpoint("auth/v1/token")?;
        endpoint
            .query_pairs_mut()
            .append_pair("grant_type", "refresh_token");
        self.token_request(endpoint, &RefreshBody { refresh_token }).await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), InfraError> {
        let endpoint = self.endpoint("auth/v1/logout")?;
        self.post_json(endpoint, &serde_json::json!({}), Some(access_token))
            .await?;
        Ok(())
    }
}

pub(crate) fn normalize_base_url(raw: &str) -> Result<Url, InfraError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid backend url '{trimmed}': {error}")))
}

fn token_from_payload(payload: TokenPayload) -> Result<Option<AuthTokenResponse>, InfraError> {
    let Some(access_token) = payload
        .access_token
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    else {
        return Ok(None);
    };
    let user = payload
        .user
        .ok_or_else(|| InfraError::Http("token response did not include a user".to_string()))?;

    Ok(Some(AuthTokenResponse {
        access_token,
        refresh_token: payload.refresh_token,
        expires_in: payload.expires_in.unwrap_or(0).max(0),
        token_type: payload.token_type,
        user: SessionUser {
            id: user.id,
            email: user.email,
        },
    }))
}

fn auth_http_error(status: StatusCode, body: &str) -> InfraError {
    let parsed = serde_json::from_str::<ErrorPayload>(body).unwrap_or_default();
    let detail = parsed
        .error_description
        .or(parsed.msg)
        .or(parsed.message)
        .or(parsed.error);

    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::UNPROCESSABLE_ENTITY
        | StatusCode::TOO_MANY_REQUESTS => InfraError::Auth(
            detail.unwrap_or_else(|| format!("authentication failed (http {})", status.as_u16())),
        ),
        _ => match detail {
            Some(detail) => InfraError::Http(format!("auth service error: http {}; {detail}", status.as_u16())),
            None => InfraError::Http(format!("auth service error: http {}", status.as_u16())),
        },
    }
}
