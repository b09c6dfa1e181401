use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Computes CFSSL "standard" auth tokens: HMAC-SHA256 over the request
/// payload (plus optional additional data), keyed with the hex-decoded
/// shared secret.
#[derive(Clone, Debug)]
pub struct AuthProvider {
    mac: HmacSha256,
    additional_data: Vec<u8>,
}

impl AuthProvider {
    pub fn new(hex_key: &str, additional_data: &[u8]) -> Result<Self> {
        let key = hex::decode(hex_key.trim())
            .map_err(|e| Error::AuthProvider(format!("auth key is not valid hex: {e}")))?;
        if key.is_empty() {
            return Err(Error::AuthProvider("auth key is empty".into()));
        }
        let mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| Error::AuthProvider(format!("auth key rejected: {e}")))?;
        Ok(Self {
            mac,
            additional_data: additional_data.to_vec(),
        })
    }

    /// Base64 token authenticating `payload`
    pub fn token(&self, payload: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.update(&self.additional_data);
        BASE64.encode(mac.finalize().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "b8093a819f367241a8e0f55125589e25";

    #[test]
    fn rejects_non_hex_key() {
        let err = AuthProvider::new("not-hex", &[]).unwrap_err();
        assert!(matches!(err, Error::AuthProvider(_)));
    }

    #[test]
    fn rejects_empty_key() {
        assert!(AuthProvider::new("  ", &[]).is_err());
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let a = AuthProvider::new(KEY, &[]).unwrap();
        let b = AuthProvider::new(&format!(" {KEY}\n"), &[]).unwrap();
        assert_eq!(a.token(b"payload"), b.token(b"payload"));
    }

    #[test]
    fn token_is_deterministic_and_keyed() {
        let provider = AuthProvider::new(KEY, &[]).unwrap();
        assert_eq!(provider.token(b"abc"), provider.token(b"abc"));
        assert_ne!(provider.token(b"abc"), provider.token(b"abd"));

        let other = AuthProvider::new("00112233445566778899aabbccddeeff", &[]).unwrap();
        assert_ne!(provider.token(b"abc"), other.token(b"abc"));
    }

    #[test]
    fn additional_data_changes_token() {
        let plain = AuthProvider::new(KEY, &[]).unwrap();
        let salted = AuthProvider::new(KEY, b"extra").unwrap();
        assert_ne!(plain.token(b"abc"), salted.token(b"abc"));
    }
}
