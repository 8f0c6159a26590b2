use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FlowConfig;
use crate::error::AuthloopError;

/// Terminal success value of a flow.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenData {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

impl TokenData {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => Utc::now() >= expires,
            None => false,
        }
    }
}

/// Raw token response from the authorization server.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
}

impl TokenResponse {
    fn into_token_data(self) -> TokenData {
        let expires_at = self
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        TokenData {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token,
            expires_at,
            scope: self.scope,
        }
    }
}

/// Exchange the authorization code for a token. One POST, no retry:
/// authorization codes are single-use, so a failed exchange ends the flow.
pub async fn exchange_code(
    config: &FlowConfig,
    code: &str,
    code_verifier: &str,
    redirect_uri: &str,
) -> Result<TokenData, AuthloopError> {
    let mut form: Vec<(&str, &str)> = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", &config.client_id),
        ("code_verifier", code_verifier),
    ];
    if let Some(secret) = &config.client_secret {
        form.push(("client_secret", secret));
    }
    for (key, value) in &config.extra_token_params {
        form.push((key, value));
    }

    let client = reqwest::Client::new();
    let resp = client
        .post(&config.token_url)
        .form(&form)
        .send()
        .await
        .map_err(|e| AuthloopError::TokenExchange {
            status: None,
            body: format!("request failed: {e}"),
        })?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AuthloopError::TokenExchange {
            status: Some(status.as_u16()),
            body,
        });
    }

    let token_resp: TokenResponse =
        resp.json().await.map_err(|e| AuthloopError::TokenExchange {
            status: Some(status.as_u16()),
            body: format!("could not parse token response: {e}"),
        })?;

    Ok(token_resp.into_token_data())
}
