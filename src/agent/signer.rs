use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ExchangeError;

type HmacSha256 = Hmac<Sha256>;

/// Signs exchange requests with HMAC-SHA256
///
/// Message format: timestamp + api key + receive window + query string
#[derive(Clone)]
pub struct RequestSigner {
    api_key: String,
    secret_key: String,
    recv_window: u64,
}

impl RequestSigner {
    pub fn new(api_key: String, secret_key: String, recv_window: u64) -> Self {
        Self {
            api_key,
            secret_key,
            recv_window,
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn recv_window(&self) -> u64 {
        self.recv_window
    }

    /// String the signature covers
    pub fn canonical_string(&self, query: &str, timestamp: &str) -> String {
        format!("{}{}{}{}", timestamp, self.api_key, self.recv_window, query)
    }

    /// Lowercase hex HMAC of the canonical string
    pub fn sign(&self, query: &str, timestamp: &str) -> Result<String, ExchangeError> {
        if self.secret_key.is_empty() {
            return Err(ExchangeError::Configuration(
                "secret key is empty".to_string(),
            ));
        }

        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| ExchangeError::Configuration(format!("invalid secret key: {}", e)))?;
        mac.update(self.canonical_string(query, timestamp).as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Current time in milliseconds since the epoch
    pub fn timestamp() -> String {
        Utc::now().timestamp_millis().to_string()
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .field("recv_window", &self.recv_window)
            .finish()
    }
}
