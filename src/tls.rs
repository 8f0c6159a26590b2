use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::error::AuthloopError;

/// Certificate and key files for the local redirect listener.
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Build a TLS acceptor from PEM files on disk.
pub fn build_acceptor(paths: &TlsPaths) -> Result<TlsAcceptor, AuthloopError> {
    // Idempotent; a no-op when a process-wide provider is already set.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let certs = load_certs(&paths.cert)?;
    let key = load_key(&paths.key)?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| AuthloopError::Tls {
            detail: e.to_string(),
        })?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, AuthloopError> {
    let file = std::fs::File::open(path).map_err(|e| AuthloopError::Tls {
        detail: format!("could not open certificate file {}: {e}", path.display()),
    })?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AuthloopError::Tls {
            detail: format!("could not read certificates from {}: {e}", path.display()),
        })?;
    if certs.is_empty() {
        return Err(AuthloopError::Tls {
            detail: format!("no certificates found in {}", path.display()),
        });
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, AuthloopError> {
    let file = std::fs::File::open(path).map_err(|e| AuthloopError::Tls {
        detail: format!("could not open key file {}: {e}", path.display()),
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| AuthloopError::Tls {
            detail: format!("could not read private key from {}: {e}", path.display()),
        })?
        .ok_or_else(|| AuthloopError::Tls {
            detail: format!("no private key found in {}", path.display()),
        })
}
