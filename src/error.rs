use std::io;

#[derive(Debug, thiserror::Error)]
pub enum AuthloopError {
    #[error("Invalid configuration: {detail}")]
    Config { detail: String },

    #[error("Could not bind the local redirect listener: {0}")]
    Bind(io::Error),

    #[error("Could not gather entropy for flow secrets: {0}")]
    Entropy(String),

    #[error("Callback state did not match the value sent to the authorization server; refusing the authorization code")]
    StateMismatch,

    #[error("{}", format_denied(.error, .description))]
    AuthorizationDenied { error: String, description: String },

    #[error("{}", format_token_exchange(.status, .body))]
    TokenExchange { status: Option<u16>, body: String },

    #[error("Could not set up TLS for the local redirect listener: {detail}")]
    Tls { detail: String },

    #[error("Authorization flow was cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn format_denied(error: &str, description: &str) -> String {
    if description.is_empty() {
        format!("Authorization server denied the request: {error}")
    } else {
        format!("Authorization server denied the request: {error} ({description})")
    }
}

fn format_token_exchange(status: &Option<u16>, body: &str) -> String {
    match status {
        Some(status) => format!("Token exchange failed with status {status}: {body}"),
        None => format!("Token exchange failed: {body}"),
    }
}

impl AuthloopError {
    /// True when the flow ended because of cancellation or a deadline,
    /// as opposed to being rejected.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AuthloopError::Cancelled)
    }
}
