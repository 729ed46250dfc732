//! Request signer - HMAC-SHA512 over the canonical request string

use hmac::{Hmac, Mac};
use sha2::Sha512;

/// Signed headers attached to every authenticated request, REST or the
/// account WebSocket handshake.
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    pub api_key: String,
    pub signature: String,
    pub timestamp: u64,
}

/// HMAC-SHA512 signer. The canonical message is
/// `{timestamp}{VERB}{path}{body}`, the signature hex-encoded.
pub struct RequestSigner {
    api_key: String,
    api_secret: String,
}

impl RequestSigner {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.api_key
    }

    /// Sign one request. `path` must include any query string; `body` is the
    /// exact serialized payload ("" for GET/DELETE without a body).
    pub fn sign(&self, timestamp: u64, method: &str, path: &str, body: &str) -> SignatureHeaders {
        type HmacSha512 = Hmac<Sha512>;

        let payload = format!("{}{}{}{}", timestamp, method.to_uppercase(), path, body);

        let mut mac = HmacSha512::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());

        SignatureHeaders {
            api_key: self.api_key.clone(),
            signature: hex::encode(mac.finalize().into_bytes()),
            timestamp,
        }
    }
}
