use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowserLauncher, SystemBrowser};
use crate::callback::RedirectListener;
use crate::config::FlowConfig;
use crate::error::AuthloopError;
use crate::pkce::{self, generate_pkce};
use crate::token::{exchange_code, TokenData};

/// Run the browser authorization flow: generate PKCE secrets, bind the
/// local redirect listener, open the browser on the authorization URL,
/// wait for the callback, and exchange the code for a token.
///
/// Cancelling `cancel` at any point unwinds every in-flight task and
/// returns [`AuthloopError::Cancelled`].
pub async fn run_flow(
    config: &FlowConfig,
    cancel: CancellationToken,
) -> Result<TokenData, AuthloopError> {
    run_flow_with_launcher(config, cancel, Arc::new(SystemBrowser)).await
}

/// Same as [`run_flow`] with a caller-supplied browser launcher.
pub async fn run_flow_with_launcher(
    config: &FlowConfig,
    cancel: CancellationToken,
    launcher: Arc<dyn BrowserLauncher>,
) -> Result<TokenData, AuthloopError> {
    config.validate()?;
    let pkce = generate_pkce()?;

    if cancel.is_cancelled() {
        return Err(AuthloopError::Cancelled);
    }

    // Everything spawned below lives under this scope: the first fatal
    // error, or the caller's cancellation, unwinds all of it.
    let scope = cancel.child_token();

    let tls = config.listener_tls();
    let listener = tokio::select! {
        _ = cancel.cancelled() => return Err(AuthloopError::Cancelled),
        bound = RedirectListener::bind(&config.callback_path, tls.as_ref()) => bound?,
    };
    let redirect_uri = listener.redirect_uri();
    let auth_url =
        build_authorization_url(config, &pkce.code_challenge, listener.state(), &redirect_uri)?;

    let (cb_tx, cb_rx) = oneshot::channel();
    let server = tokio::spawn(listener.serve(cb_tx, scope.clone()));

    // The ready channel is the browser task's only source of the URL, and
    // it is published only after the listener is bound: the browser can
    // never land on an unbound port.
    let (ready_tx, ready_rx) = oneshot::channel::<String>();
    let browser_scope = scope.clone();
    let browser = tokio::spawn(async move {
        let url = tokio::select! {
            _ = browser_scope.cancelled() => return,
            url = ready_rx => match url {
                Ok(url) => url,
                Err(_) => return,
            },
        };
        tracing::info!("Open {url}");
        // Platform launchers can block; keep the launch off the async
        // unwind path so a hung browser cannot stall cancellation.
        let open = tokio::task::spawn_blocking(move || launcher.open(&url));
        tokio::select! {
            _ = browser_scope.cancelled() => {}
            opened = open => {
                if let Ok(Err(e)) = opened {
                    tracing::warn!("could not open the browser, open the URL above manually: {e}");
                }
            }
        }
    });
    let _ = ready_tx.send(auth_url);

    let result = wait_and_exchange(config, &pkce.code_verifier, &redirect_uri, cb_rx, &cancel).await;

    // First outcome wins; unwind the siblings before returning so no task
    // leaks past this point.
    scope.cancel();
    let _ = browser.await;
    let _ = server.await;
    result
}

async fn wait_and_exchange(
    config: &FlowConfig,
    code_verifier: &str,
    redirect_uri: &str,
    cb_rx: oneshot::Receiver<Result<String, AuthloopError>>,
    cancel: &CancellationToken,
) -> Result<TokenData, AuthloopError> {
    let code = tokio::select! {
        _ = cancel.cancelled() => return Err(AuthloopError::Cancelled),
        callback = cb_rx => match callback {
            Ok(Ok(code)) => code,
            Ok(Err(e)) => return Err(e),
            // Listener went away without resolving; only happens on unwind.
            Err(_) => return Err(AuthloopError::Cancelled),
        },
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(AuthloopError::Cancelled),
        token = exchange_code(config, &code, code_verifier, redirect_uri) => token,
    }
}

fn build_authorization_url(
    config: &FlowConfig,
    code_challenge: &str,
    state: &str,
    redirect_uri: &str,
) -> Result<String, AuthloopError> {
    let mut url = reqwest::Url::parse(&config.auth_url).map_err(|e| AuthloopError::Config {
        detail: format!("invalid authorization endpoint URL '{}': {e}", config.auth_url),
    })?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "code");
        query.append_pair("client_id", &config.client_id);
        query.append_pair("redirect_uri", redirect_uri);
        if !config.scopes.is_empty() {
            query.append_pair("scope", &config.scopes.join(" "));
        }
        query.append_pair("state", state);
        query.append_pair("code_challenge", code_challenge);
        query.append_pair("code_challenge_method", pkce::CHALLENGE_METHOD);
        for (key, value) in &config.extra_auth_params {
            query.append_pair(key, value);
        }
    }
    Ok(url.to_string())
}
