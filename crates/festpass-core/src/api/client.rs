//! API client for the festival registration backend.
//!
//! This module provides the `ApiClient` struct for the token endpoints, the
//! identity endpoint, the admin back office and the public registration form.

use std::time::Duration;

use reqwest::{multipart, Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::IdentityRecord;
use crate::models::{
    AdminUser, CreatedRegistration, CreatedUser, NewRegistration, NewUser, Registration,
    RegistrationStatus, Statistics, StatusUpdate,
};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const TOKEN_PATH: &str = "token/";
const TOKEN_REFRESH_PATH: &str = "token/refresh/";
const IDENTITY_PATH: &str = "auth/me/";
const ADMIN_REGISTRATIONS_PATH: &str = "admin/inscriptions/";
const ADMIN_STATISTICS_PATH: &str = "admin/statistics/";
const ADMIN_USERS_PATH: &str = "admin/users/";
const ADMIN_BADGES_ZIP_PATH: &str = "admin/badges/download/";
const PUBLIC_REGISTRATIONS_PATH: &str = "inscriptions/";

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access: Option<String>,
    refresh: Option<String>,
}

/// Tokens issued by the token endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    pub access: String,
    /// Present on login; only present on refresh when the server rotates it
    pub refresh: Option<String>,
}

/// List endpoints answer either with a bare array or a paginated envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListResponse<T> {
    Page { results: Vec<T> },
    Plain(Vec<T>),
}

impl<T> ListResponse<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListResponse::Page { results } => results,
            ListResponse::Plain(items) => items,
        }
    }
}

/// A file served by the back office (badge, invitation, badge archive).
#[derive(Debug, Clone)]
pub struct Download {
    /// Suggested file name for saving locally
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// API client for the registration backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

impl ApiClient {
    /// Create a new API client for the given base URL (e.g. `http://127.0.0.1:8000/api`)
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    // ===== Token Endpoints =====

    /// Exchange a username and password for an access/refresh pair.
    pub async fn obtain_token(&self, username: &str, password: &str) -> Result<IssuedTokens, ApiError> {
        let url = self.url(TOKEN_PATH);
        debug!(url = %url, username = username, "Requesting token pair");

        let response = self
            .client
            .post(&url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("token response: {}", e)))?;

        match body.access {
            Some(access) if !access.is_empty() => Ok(IssuedTokens {
                access,
                refresh: body.refresh.filter(|r| !r.is_empty()),
            }),
            _ => Err(ApiError::InvalidResponse(
                "token response has no access token".to_string(),
            )),
        }
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh_token(&self, refresh: &str) -> Result<IssuedTokens, ApiError> {
        let url = self.url(TOKEN_REFRESH_PATH);
        debug!(url = %url, "Refreshing access token");

        let response = self
            .client
            .post(&url)
            .json(&RefreshRequest { refresh })
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("refresh response: {}", e)))?;

        match body.access {
            Some(access) if !access.is_empty() => Ok(IssuedTokens {
                access,
                refresh: body.refresh.filter(|r| !r.is_empty()),
            }),
            _ => Err(ApiError::InvalidResponse(
                "refresh response has no access token".to_string(),
            )),
        }
    }

    /// Fetch the identity of the holder of `access` from the server.
    pub async fn fetch_me(&self, access: &str) -> Result<IdentityRecord, ApiError> {
        let url = self.url(IDENTITY_PATH);
        let response = self.client.get(&url).bearer_auth(access).send().await?;
        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("identity response: {}", e)))
    }

    // ===== Response Handling =====

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send an authenticated request, retrying with exponential backoff while rate limited.
    async fn send<B: Serialize>(&self, method: Method, url: &str, body: Option<&B>) -> Result<Response, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self.authorized(self.client.request(method.clone(), url));
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = self.send::<()>(Method::GET, url, None).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", url, e)))
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, url: &str, body: &B) -> Result<T, ApiError> {
        let response = self.send(Method::POST, url, Some(body)).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", url, e)))
    }

    async fn download(&self, url: &str, filename: String) -> Result<Download, ApiError> {
        let response = self.send::<()>(Method::GET, url, None).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?.to_vec();
        debug!(url = url, size = bytes.len(), "Downloaded file");
        Ok(Download {
            filename,
            content_type,
            bytes,
        })
    }

    // ===== Admin: Registrations =====

    /// Fetch every registration visible to the current user
    pub async fn list_registrations(&self) -> Result<Vec<Registration>, ApiError> {
        let url = self.url(ADMIN_REGISTRATIONS_PATH);
        let response: ListResponse<Registration> = self.get(&url).await?;
        Ok(response.into_vec())
    }

    /// Set the review status of a registration, with an optional remark for the applicant
    pub async fn update_registration_status(
        &self,
        id: i64,
        status: RegistrationStatus,
        remark: &str,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!("{}{}/status/", ADMIN_REGISTRATIONS_PATH, id));
        let body = StatusUpdate {
            statut: status,
            admin_remarque: remark.to_string(),
        };
        self.send(Method::PATCH, &url, Some(&body)).await?;
        info!(id = id, status = body.statut.as_str(), "Registration status updated");
        Ok(())
    }

    pub async fn validate_registration(&self, id: i64, remark: &str) -> Result<(), ApiError> {
        self.update_registration_status(id, RegistrationStatus::Validated, remark)
            .await
    }

    pub async fn refuse_registration(&self, id: i64, remark: &str) -> Result<(), ApiError> {
        self.update_registration_status(id, RegistrationStatus::Refused, remark)
            .await
    }

    pub async fn fetch_statistics(&self) -> Result<Statistics, ApiError> {
        let url = self.url(ADMIN_STATISTICS_PATH);
        self.get(&url).await
    }

    // ===== Admin: Files =====

    pub async fn download_badge(&self, id: i64) -> Result<Download, ApiError> {
        let url = self.url(&format!("{}{}/badge/", ADMIN_REGISTRATIONS_PATH, id));
        self.download(&url, format!("badge_{}.png", id)).await
    }

    pub async fn download_invitation(&self, id: i64) -> Result<Download, ApiError> {
        let url = self.url(&format!("{}{}/invitation/", ADMIN_REGISTRATIONS_PATH, id));
        self.download(&url, format!("invitation_{}.pdf", id)).await
    }

    /// Generate and fetch the archive containing every badge
    pub async fn download_badges_zip(&self) -> Result<Download, ApiError> {
        let url = self.url(ADMIN_BADGES_ZIP_PATH);
        self.download(&url, "badges_ecofest.zip".to_string()).await
    }

    // ===== Admin: Users =====

    pub async fn list_users(&self) -> Result<Vec<AdminUser>, ApiError> {
        let url = self.url(ADMIN_USERS_PATH);
        let response: ListResponse<AdminUser> = self.get(&url).await?;
        Ok(response.into_vec())
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<CreatedUser, ApiError> {
        let url = self.url(ADMIN_USERS_PATH);
        let created: CreatedUser = self.post(&url, user).await?;
        info!(id = created.id, username = %user.username, "User created");
        Ok(created)
    }

    // ===== Public Registration =====

    /// Submit the public registration form (multipart, no authentication).
    pub async fn create_registration(&self, form: &NewRegistration) -> Result<CreatedRegistration, ApiError> {
        let url = self.url(PUBLIC_REGISTRATIONS_PATH);

        let mut body = multipart::Form::new();
        for (name, value) in form.form_fields() {
            body = body.text(name, value);
        }
        if let Some(ref path) = form.passport_file {
            let bytes = tokio::fs::read(path).await.map_err(|e| {
                ApiError::InvalidResponse(format!("cannot read {}: {}", path.display(), e))
            })?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "passeport".to_string());
            body = body.part("passeport_file", multipart::Part::bytes(bytes).file_name(file_name));
        }

        let response = self.client.post(&url).multipart(body).send().await?;
        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("registration response: {}", e)))
    }

    /// Ask the backend to (re)send the confirmation email for a registration
    pub async fn resend_confirmation(&self, id: i64) -> Result<(), ApiError> {
        let url = self.url(&format!("{}{}/resend_confirmation/", PUBLIC_REGISTRATIONS_PATH, id));
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    /// Register, then request the confirmation email.
    ///
    /// A failed confirmation request is logged and does not fail the registration.
    pub async fn submit_registration(&self, form: &NewRegistration) -> Result<CreatedRegistration, ApiError> {
        let created = self.create_registration(form).await?;
        info!(id = created.id, "Registration received");
        if let Err(e) = self.resend_confirmation(created.id).await {
            warn!(id = created.id, error = %e, "Failed to request confirmation email");
        }
        Ok(created)
    }
}
