use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::AuthloopError;
use crate::pkce::generate_state;
use crate::tls::{self, TlsPaths};

/// Budget for reading one request and flushing its response, so a hung
/// client connection cannot wedge the accept loop.
const CONNECTION_DEADLINE: Duration = Duration::from_secs(10);

const COMPLETION_PAGE: &str = "<!DOCTYPE html><html><body><h1>Authentication successful!</h1>\
     <p>You can close this window and return to the terminal.</p></body></html>";

const DENIED_PAGE: &str = "<!DOCTYPE html><html><body><h1>Authentication was not completed</h1>\
     <p>The authorization server reported an error. You can close this window and return to the terminal.</p></body></html>";

const ALREADY_COMPLETED_PAGE: &str = "<!DOCTYPE html><html><body><h1>Already completed</h1>\
     <p>This authorization flow has already finished.</p></body></html>";

const STATE_MISMATCH_PAGE: &str = "<!DOCTYPE html><html><body><h1>Authentication failed</h1>\
     <p>The state parameter did not match. The response was rejected.</p></body></html>";

const NOT_FOUND_PAGE: &str =
    "<!DOCTYPE html><html><body><h1>Not found</h1></body></html>";

const BAD_REQUEST_PAGE: &str =
    "<!DOCTYPE html><html><body><h1>Bad request</h1></body></html>";

/// Ephemeral loopback listener that captures the authorization redirect.
///
/// One listener serves one flow: it generates its own anti-forgery state at
/// bind time and resolves the callback channel at most once. A mismatched
/// state fails the flow rather than being ignored, since it indicates a
/// forged callback rather than a spurious late request.
pub struct RedirectListener {
    listener: TcpListener,
    tls: Option<tokio_rustls::TlsAcceptor>,
    state: String,
    path: String,
    addr: SocketAddr,
}

impl RedirectListener {
    /// Bind an OS-assigned loopback port. When TLS paths are given, the
    /// listener serves HTTPS; otherwise plain HTTP.
    pub async fn bind(path: &str, tls: Option<&TlsPaths>) -> Result<Self, AuthloopError> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(AuthloopError::Bind)?;
        let addr = listener.local_addr().map_err(AuthloopError::Bind)?;
        let tls = tls.map(tls::build_acceptor).transpose()?;
        let state = generate_state()?;
        Ok(Self {
            listener,
            tls,
            state,
            path: path.to_string(),
            addr,
        })
    }

    /// Redirect URI matching the bound port and configured scheme.
    pub fn redirect_uri(&self) -> String {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        format!("{scheme}://{}{}", self.addr, self.path)
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// Accept loop. Resolves `tx` at most once: with the authorization code
    /// on a valid callback, or with an error on a denial or state mismatch.
    /// After the first resolution it keeps answering "already completed"
    /// until cancelled, so late redirects get a sensible page instead of a
    /// connection error. Cancellation closes the listener even with a
    /// connection in flight.
    pub async fn serve(
        self,
        tx: oneshot::Sender<Result<String, AuthloopError>>,
        cancel: CancellationToken,
    ) {
        let mut tx = Some(tx);
        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!("could not accept a callback connection: {e}");
                        continue;
                    }
                },
            };

            let done = tx.is_none();
            let handled = tokio::select! {
                _ = cancel.cancelled() => break,
                r = tokio::time::timeout(CONNECTION_DEADLINE, self.handle_connection(stream, done)) => r,
            };
            match handled {
                Ok(Ok(Some(resolution))) => {
                    if let Some(tx) = tx.take() {
                        let _ = tx.send(resolution);
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => tracing::debug!(%peer, "callback connection error: {e}"),
                Err(_) => tracing::debug!(%peer, "callback connection timed out"),
            }
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        done: bool,
    ) -> io::Result<Option<Result<String, AuthloopError>>> {
        match &self.tls {
            Some(acceptor) => {
                let stream = acceptor.accept(stream).await?;
                self.handle_request(stream, done).await
            }
            None => self.handle_request(stream, done).await,
        }
    }

    /// Read one HTTP request and answer it. Returns the flow resolution, if
    /// this request produced one.
    async fn handle_request<S>(
        &self,
        mut stream: S,
        done: bool,
    ) -> io::Result<Option<Result<String, AuthloopError>>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..n]);

        if done {
            respond(&mut stream, "200 OK", ALREADY_COMPLETED_PAGE).await?;
            return Ok(None);
        }

        let Some(target) = request_target(&request) else {
            respond(&mut stream, "400 Bad Request", BAD_REQUEST_PAGE).await?;
            return Ok(None);
        };
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };
        if path != self.path {
            respond(&mut stream, "404 Not Found", NOT_FOUND_PAGE).await?;
            return Ok(None);
        }

        let params = parse_query(query);

        // A bare hit on the path (health check, prefetch) carries none of
        // the callback parameters; answer it and keep waiting.
        if !params.contains_key("code")
            && !params.contains_key("error")
            && !params.contains_key("state")
        {
            respond(&mut stream, "400 Bad Request", BAD_REQUEST_PAGE).await?;
            return Ok(None);
        }

        // The server echoes state on both success and error responses, so
        // it is checked before anything else.
        if params.get("state").map(String::as_str) != Some(self.state.as_str()) {
            respond(&mut stream, "400 Bad Request", STATE_MISMATCH_PAGE).await?;
            return Ok(Some(Err(AuthloopError::StateMismatch)));
        }

        if let Some(error) = params.get("error") {
            let description = params
                .get("error_description")
                .cloned()
                .unwrap_or_default();
            respond(&mut stream, "200 OK", DENIED_PAGE).await?;
            return Ok(Some(Err(AuthloopError::AuthorizationDenied {
                error: error.clone(),
                description,
            })));
        }

        match params.get("code") {
            Some(code) if !code.is_empty() => {
                respond(&mut stream, "200 OK", COMPLETION_PAGE).await?;
                Ok(Some(Ok(code.clone())))
            }
            _ => {
                // Neither code nor error: not a callback, keep waiting.
                respond(&mut stream, "400 Bad Request", BAD_REQUEST_PAGE).await?;
                Ok(None)
            }
        }
    }
}

async fn respond<S>(stream: &mut S, status: &str, body: &str) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Extract the request target from "GET /callback?code=... HTTP/1.1".
fn request_target(request: &str) -> Option<&str> {
    let first_line = request.lines().next()?;
    let mut parts = first_line.split_whitespace();
    if parts.next() != Some("GET") {
        return None;
    }
    parts.next()
}

fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (key, value),
            None => (pair, ""),
        };
        params.insert(urldecode(key), urldecode(value));
    }
    params
}

/// Percent-decoding into bytes first, so multibyte UTF-8 values survive.
fn urldecode(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    let mut bytes = s.bytes();
    while let Some(b) = bytes.next() {
        if b == b'%' {
            let hi = bytes.next();
            let lo = bytes.next();
            if let (Some(h), Some(l)) = (hi, lo) {
                let hex = [h, l];
                let val = std::str::from_utf8(&hex)
                    .ok()
                    .and_then(|s| u8::from_str_radix(s, 16).ok());
                match val {
                    Some(val) => out.push(val),
                    None => {
                        out.push(b'%');
                        out.push(h);
                        out.push(l);
                    }
                }
            } else {
                out.push(b'%');
            }
        } else if b == b'+' {
            out.push(b' ');
        } else {
            out.push(b);
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_target_from_valid_request() {
        let request = "GET /callback?code=abc123&state=xyz HTTP/1.1\r\nHost: localhost\r\n";
        assert_eq!(request_target(request), Some("/callback?code=abc123&state=xyz"));
    }

    #[test]
    fn request_target_rejects_non_get() {
        let request = "POST /callback HTTP/1.1\r\nHost: localhost\r\n";
        assert_eq!(request_target(request), None);
    }

    #[test]
    fn parse_query_splits_params() {
        let params = parse_query("code=abc123&state=xyz");
        assert_eq!(params.get("code").map(String::as_str), Some("abc123"));
        assert_eq!(params.get("state").map(String::as_str), Some("xyz"));
    }

    #[test]
    fn parse_query_decodes_values() {
        let params = parse_query("error_description=user%20clicked+cancel");
        assert_eq!(
            params.get("error_description").map(String::as_str),
            Some("user clicked cancel")
        );
    }

    #[test]
    fn parse_query_empty() {
        assert!(parse_query("").is_empty());
    }

    #[test]
    fn urldecode_basic() {
        assert_eq!(urldecode("hello%20world"), "hello world");
        assert_eq!(urldecode("a+b"), "a b");
        assert_eq!(urldecode("plain"), "plain");
    }

    #[test]
    fn urldecode_multibyte_utf8() {
        assert_eq!(urldecode("caf%C3%A9"), "café");
        assert_eq!(urldecode("%E2%9C%93"), "✓");
        // Truncated and invalid escapes pass through as-is.
        assert_eq!(urldecode("100%"), "100%");
        assert_eq!(urldecode("%zz"), "%zz");
    }

    async fn send_request(addr: SocketAddr, target: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    struct Served {
        addr: SocketAddr,
        state: String,
        rx: oneshot::Receiver<Result<String, AuthloopError>>,
        cancel: CancellationToken,
    }

    async fn start_listener() -> Served {
        let listener = RedirectListener::bind("/callback", None).await.unwrap();
        let addr = listener.addr;
        let state = listener.state().to_string();
        let (tx, rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        tokio::spawn(listener.serve(tx, cancel.clone()));
        Served {
            addr,
            state,
            rx,
            cancel,
        }
    }

    #[tokio::test]
    async fn valid_callback_resolves_code() {
        let served = start_listener().await;
        let response = send_request(
            served.addr,
            &format!("/callback?code=abc123&state={}", served.state),
        )
        .await;
        assert!(response.contains("200 OK"));
        assert!(response.contains("Authentication successful"));

        let resolution = served.rx.await.unwrap();
        assert_eq!(resolution.unwrap(), "abc123");
        served.cancel.cancel();
    }

    #[tokio::test]
    async fn mismatched_state_fails_flow() {
        let served = start_listener().await;
        let response =
            send_request(served.addr, "/callback?code=abc123&state=forged").await;
        assert!(response.contains("400 Bad Request"));

        let resolution = served.rx.await.unwrap();
        assert!(matches!(
            resolution.unwrap_err(),
            AuthloopError::StateMismatch
        ));
        served.cancel.cancel();
    }

    #[tokio::test]
    async fn denial_resolves_provider_error() {
        let served = start_listener().await;
        send_request(
            served.addr,
            &format!(
                "/callback?error=access_denied&error_description=user%20declined&state={}",
                served.state
            ),
        )
        .await;

        match served.rx.await.unwrap().unwrap_err() {
            AuthloopError::AuthorizationDenied { error, description } => {
                assert_eq!(error, "access_denied");
                assert_eq!(description, "user declined");
            }
            other => panic!("unexpected resolution: {other}"),
        }
        served.cancel.cancel();
    }

    #[tokio::test]
    async fn wrong_path_does_not_resolve() {
        let mut served = start_listener().await;
        let response = send_request(served.addr, "/favicon.ico").await;
        assert!(response.contains("404 Not Found"));
        assert!(served.rx.try_recv().is_err());

        // The listener is still waiting for the real callback.
        send_request(
            served.addr,
            &format!("/callback?code=late&state={}", served.state),
        )
        .await;
        assert_eq!(served.rx.await.unwrap().unwrap(), "late");
        served.cancel.cancel();
    }

    #[tokio::test]
    async fn bare_request_without_query_does_not_resolve() {
        let mut served = start_listener().await;
        let response = send_request(served.addr, "/callback").await;
        assert!(response.contains("400 Bad Request"));
        assert!(served.rx.try_recv().is_err());

        send_request(
            served.addr,
            &format!("/callback?code=ok&state={}", served.state),
        )
        .await;
        assert_eq!(served.rx.await.unwrap().unwrap(), "ok");
        served.cancel.cancel();
    }

    #[tokio::test]
    async fn second_callback_gets_already_completed() {
        let served = start_listener().await;
        send_request(
            served.addr,
            &format!("/callback?code=first&state={}", served.state),
        )
        .await;
        assert_eq!(served.rx.await.unwrap().unwrap(), "first");

        let response = send_request(
            served.addr,
            &format!("/callback?code=second&state={}", served.state),
        )
        .await;
        assert!(response.contains("Already completed"));
        served.cancel.cancel();
    }

    #[tokio::test]
    async fn cancel_stops_the_listener() {
        let served = start_listener().await;
        served.cancel.cancel();
        // Give the accept loop a moment to unwind, then the port refuses.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(served.addr).await.is_err());
    }

    #[tokio::test]
    async fn redirect_uri_is_loopback_http() {
        let listener = RedirectListener::bind("/callback", None).await.unwrap();
        let uri = listener.redirect_uri();
        assert!(uri.starts_with("http://127.0.0.1:"));
        assert!(uri.ends_with("/callback"));
    }
}
