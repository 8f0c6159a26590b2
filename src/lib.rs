pub mod browser;
pub mod callback;
pub mod config;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod tls;
pub mod token;

pub use browser::{BrowserLauncher, SystemBrowser};
pub use callback::RedirectListener;
pub use config::FlowConfig;
pub use error::AuthloopError;
pub use flow::{run_flow, run_flow_with_launcher};
pub use pkce::{generate_pkce, generate_state, PkceChallenge};
pub use tls::TlsPaths;
pub use token::{exchange_code, TokenData};

/// One-shot convenience function: run the browser flow with no external
/// cancellation.
pub async fn login(config: &FlowConfig) -> Result<TokenData, AuthloopError> {
    flow::run_flow(config, tokio_util::sync::CancellationToken::new()).await
}
