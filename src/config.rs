use std::path::PathBuf;

use crate::error::AuthloopError;
use crate::tls::TlsPaths;

/// Immutable input for one flow execution.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Authorization endpoint of the provider.
    pub auth_url: String,
    /// Token endpoint of the provider.
    pub token_url: String,
    /// Requested scopes, in order. Not deduplicated.
    pub scopes: Vec<String>,
    /// Certificate file for the local redirect listener. TLS is enabled
    /// only when both this and `local_server_key` are set.
    pub local_server_cert: Option<PathBuf>,
    pub local_server_key: Option<PathBuf>,
    /// Extra query parameters appended to the authorization request.
    pub extra_auth_params: Vec<(String, String)>,
    /// Extra form fields appended to the token request.
    pub extra_token_params: Vec<(String, String)>,
    /// Path the local listener serves the redirect on.
    pub callback_path: String,
}

impl FlowConfig {
    pub fn new(client_id: &str, auth_url: &str, token_url: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: None,
            auth_url: auth_url.to_string(),
            token_url: token_url.to_string(),
            scopes: Vec::new(),
            local_server_cert: None,
            local_server_key: None,
            extra_auth_params: Vec::new(),
            extra_token_params: Vec::new(),
            callback_path: "/callback".to_string(),
        }
    }

    /// Reject unusable configuration before any network activity.
    pub fn validate(&self) -> Result<(), AuthloopError> {
        if self.client_id.is_empty() {
            return Err(AuthloopError::Config {
                detail: "client id must not be empty".into(),
            });
        }
        if let Err(e) = reqwest::Url::parse(&self.auth_url) {
            return Err(AuthloopError::Config {
                detail: format!("invalid authorization endpoint URL '{}': {e}", self.auth_url),
            });
        }
        if let Err(e) = reqwest::Url::parse(&self.token_url) {
            return Err(AuthloopError::Config {
                detail: format!("invalid token endpoint URL '{}': {e}", self.token_url),
            });
        }
        if !self.callback_path.starts_with('/') {
            return Err(AuthloopError::Config {
                detail: format!("callback path '{}' must start with '/'", self.callback_path),
            });
        }
        Ok(())
    }

    /// TLS material for the local listener. Set only when both a cert and
    /// a key file were given; otherwise the listener serves plain HTTP.
    pub fn listener_tls(&self) -> Option<TlsPaths> {
        match (&self.local_server_cert, &self.local_server_key) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.clone(),
                key: key.clone(),
            }),
            _ => None,
        }
    }
}
