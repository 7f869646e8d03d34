use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE as BASE64_URL_SAFE},
    Engine,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid base64 secret: {0}")]
    InvalidSecret(#[from] base64::DecodeError),

    #[error("HMAC computation failed: {0}")]
    HmacError(String),
}

/// CLOB L2 API credentials and request signing.
#[derive(Debug, Clone)]
pub struct ClobAuth {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
}

impl ClobAuth {
    pub fn new(api_key: String, api_secret: String, passphrase: String) -> Self {
        Self {
            api_key,
            api_secret,
            passphrase,
        }
    }

    /// HMAC-SHA256 over `{timestamp}{method}{path}{body}`; the secret is
    /// base64-decoded first (URL-safe alphabet, standard as fallback).
    pub fn sign(
        &self,
        timestamp: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<String, AuthError> {
        let secret_bytes = BASE64_URL_SAFE
            .decode(&self.api_secret)
            .or_else(|_| BASE64.decode(&self.api_secret))?;

        let message = format!("{timestamp}{method}{path}{body}");

        let mut mac = HmacSha256::new_from_slice(&secret_bytes)
            .map_err(|e| AuthError::HmacError(e.to_string()))?;
        mac.update(message.as_bytes());

        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}
