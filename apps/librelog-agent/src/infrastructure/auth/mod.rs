//! Credential Exchange over HTTP
//!
//! One `POST {api_url}/api/login` per call:
//!
//! ```text
//! request:  {"account_number": "...", "password": "..."}
//! response: {"token": "..."}                      (2xx)
//!           {"error": "invalid credentials"}      (4xx)
//! ```
//!
//! Status mapping:
//! - 400/401/403: credentials rejected, `IngestError::Authentication`
//! - 408/429/5xx, timeouts, connection errors: `IngestError::Transport`
//! - unexpected or unparseable body: `IngestError::Protocol`
//!
//! No retries here; the session manager owns the retry policy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::application::ports::{CredentialExchange, IngestError};
use crate::domain::session::{Credentials, SessionToken};

#[derive(Serialize)]
struct LoginRequest<'a> {
    account_number: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Exchanges credentials with the login API.
#[derive(Debug, Clone)]
pub struct HttpCredentialExchanger {
    client: Client,
    login_url: Url,
}

impl HttpCredentialExchanger {
    /// Create an exchanger for the API rooted at `api_url`.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if the login URL cannot be derived and `Transport`
    /// if the HTTP client cannot be built.
    pub fn new(api_url: &Url, timeout: Duration) -> Result<Self, IngestError> {
        let login_url = api_url
            .join("api/login")
            .map_err(|e| IngestError::Protocol(format!("invalid API URL: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        Ok(Self { client, login_url })
    }

    /// The resolved login endpoint.
    #[must_use]
    pub const fn login_url(&self) -> &Url {
        &self.login_url
    }
}

#[async_trait]
impl CredentialExchange for HttpCredentialExchanger {
    async fn exchange(&self, credentials: &Credentials) -> Result<SessionToken, IngestError> {
        tracing::debug!(
            url = %self.login_url,
            account = credentials.account(),
            "Requesting session token"
        );

        let response = self
            .client
            .post(self.login_url.clone())
            .json(&LoginRequest {
                account_number: credentials.account(),
                password: credentials.secret(),
            })
            .send()
            .await
            .map_err(|e| IngestError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IngestError::Transport(e.without_url().to_string()))?;

        if status.is_success() {
            let login: LoginResponse = serde_json::from_str(&body)
                .map_err(|e| IngestError::Protocol(format!("invalid login response: {e}")))?;
            if login.token.is_empty() {
                return Err(IngestError::Protocol("login response has empty token".into()));
            }
            return Ok(SessionToken::new(login.token));
        }

        let reason = serde_json::from_str::<ErrorResponse>(&body)
            .map_or_else(|_| status.to_string(), |e| e.error);

        Err(categorize_status(status, reason))
    }
}

fn categorize_status(status: StatusCode, reason: String) -> IngestError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            IngestError::Authentication(reason)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            IngestError::Transport(format!("{status}: {reason}"))
        }
        s if s.is_server_error() => IngestError::Transport(format!("{status}: {reason}")),
        _ => IngestError::Protocol(format!("unexpected login status {status}: {reason}")),
    }
}
