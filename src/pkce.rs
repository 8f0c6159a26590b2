use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::TryRngCore;
use sha2::{Digest, Sha256};

use crate::error::AuthloopError;

/// Challenge method sent in the authorization request. The plain method is
/// never used.
pub const CHALLENGE_METHOD: &str = "S256";

pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
}

/// Generate a fresh PKCE pair for a single flow execution. Fails only when
/// the OS entropy source does.
pub fn generate_pkce() -> Result<PkceChallenge, AuthloopError> {
    let code_verifier = random_urlsafe()?;

    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    let code_challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    Ok(PkceChallenge {
        code_verifier,
        code_challenge,
    })
}

/// Anti-forgery `state` value, with the same entropy as the PKCE verifier.
pub fn generate_state() -> Result<String, AuthloopError> {
    random_urlsafe()
}

fn random_urlsafe() -> Result<String, AuthloopError> {
    let mut buf = [0u8; 32];
    rand::rngs::OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| AuthloopError::Entropy(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}
