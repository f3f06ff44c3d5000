//! Token validation against the identity service.

use std::time::Duration;

use ccrpc_protocol::{AuthError, Identity, TokenValidator};
use reqwest::{Url, header};
use serde::Deserialize;
use tracing::debug;

/// Validates tokens with `GET {auth-service-url}/api/V2/token`.
///
/// Without a configured URL every validation fails as unavailable, which
/// only matters for methods that require authentication.
#[derive(Debug, Clone)]
pub struct HttpTokenValidator {
    http: reqwest::Client,
    endpoint: Option<Url>,
}

#[derive(Deserialize)]
struct TokenInfo {
    user: String,
}

impl HttpTokenValidator {
    pub fn new(auth_url: Option<&str>, timeout: Duration) -> Result<Self, AuthError> {
        let endpoint = auth_url
            .map(|url| {
                Url::parse(&format!("{}/api/V2/token", url.trim_end_matches('/')))
                    .map_err(|e| AuthError::Unavailable(format!("invalid auth service url {url}: {e}")))
            })
            .transpose()?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        Ok(Self { http, endpoint })
    }
}

impl TokenValidator for HttpTokenValidator {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| AuthError::Unavailable("no auth-service-url configured".into()))?;

        let response = self
            .http
            .get(endpoint)
            .header(header::AUTHORIZATION, token)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::InvalidToken(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(AuthError::Unavailable(format!("identity service returned {status}")));
        }

        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(format!("malformed token response: {e}")))?;
        debug!("Token validated for {}", info.user);
        Ok(Identity { user_id: info.user })
    }
}
