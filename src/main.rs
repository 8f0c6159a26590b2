use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use authloop::{run_flow, AuthloopError, FlowConfig};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Parser)]
#[command(
    name = "authloop",
    version,
    about = "Log in to an OAuth2 provider from the terminal using the authorization code flow with PKCE"
)]
struct Cli {
    /// Authorization endpoint of the provider
    #[arg(long, default_value = GOOGLE_AUTH_URL)]
    auth_url: String,

    /// Token endpoint of the provider
    #[arg(long, default_value = GOOGLE_TOKEN_URL)]
    token_url: String,

    /// OAuth client ID
    #[arg(long, env = "AUTHLOOP_CLIENT_ID", default_value = "")]
    client_id: String,

    /// OAuth client secret (optional)
    #[arg(long, env = "AUTHLOOP_CLIENT_SECRET")]
    client_secret: Option<String>,

    /// Scopes to request, comma separated
    #[arg(long, default_value = "email", value_delimiter = ',')]
    scopes: Vec<String>,

    /// Certificate file for the local redirect listener (optional; with
    /// --local-server-key, the listener serves HTTPS)
    #[arg(long)]
    local_server_cert: Option<PathBuf>,

    /// Key file for the local redirect listener (optional)
    #[arg(long)]
    local_server_key: Option<PathBuf>,

    /// Give up if authorization has not finished within this many seconds
    #[arg(long, default_value_t = 300)]
    timeout: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("AUTHLOOP_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.client_id.is_empty() {
        eprintln!("You need to set OAuth2 credentials.");
        eprintln!("Create a client with your provider (for Google: https://console.cloud.google.com/apis/credentials),");
        eprintln!("then pass --client-id (and --client-secret if the client has one).");
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        if e.is_cancelled() {
            eprintln!("Error: timed out waiting for authorization");
        } else {
            eprintln!("Error: {e}");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AuthloopError> {
    if let Some(cert) = &cli.local_server_cert {
        tracing::info!("Using the TLS certificate: {}", cert.display());
    }

    let mut config = FlowConfig::new(&cli.client_id, &cli.auth_url, &cli.token_url);
    config.client_secret = cli.client_secret;
    config.scopes = cli.scopes;
    config.local_server_cert = cli.local_server_cert;
    config.local_server_key = cli.local_server_key;

    let cancel = CancellationToken::new();
    let deadline = cancel.clone();
    let timeout = Duration::from_secs(cli.timeout);
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        deadline.cancel();
    });

    let token = run_flow(&config, cancel).await?;
    match token.expires_at {
        Some(expiry) => println!("You got a valid token until {expiry}"),
        None => println!("You got a valid token"),
    }
    Ok(())
}
