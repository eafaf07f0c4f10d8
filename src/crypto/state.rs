use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::CredentialError;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_LEN: usize = 32;

/// How long a consent round-trip may take before the state is refused.
pub const STATE_TTL_SECS: i64 = 15 * 60;

/// Signs and verifies the OAuth `state` parameter.
///
/// A state is `base64url(hmac || payload)` where the payload is
/// `<issued_unix_secs>.<hex nonce>`.
pub struct StateSigner {
    key: Vec<u8>,
}

fn new_hmac(key: &[u8]) -> Result<HmacSha256, CredentialError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| CredentialError::Crypto(format!("HMAC init failed: {e}")))
}

impl StateSigner {
    /// Create a signer from a base64-encoded secret.
    pub fn new(secret_b64: &str) -> Result<Self, CredentialError> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(secret_b64)
            .map_err(|e| CredentialError::Configuration(format!("Invalid STATE_SECRET base64: {e}")))?;
        if key.len() < 16 {
            return Err(CredentialError::Configuration(
                "STATE_SECRET must decode to at least 16 bytes".into(),
            ));
        }
        Ok(Self { key })
    }

    /// Issue a fresh signed state.
    pub fn issue(&self, now: DateTime<Utc>) -> Result<String, CredentialError> {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.sign(&format!("{}.{}", now.timestamp(), hex::encode(nonce)))
    }

    fn sign(&self, payload: &str) -> Result<String, CredentialError> {
        let mut mac = new_hmac(&self.key)?;
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        let mut combined = signature.to_vec();
        combined.extend_from_slice(payload.as_bytes());

        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&combined))
    }

    /// Check the signature and age of a state returned by the provider.
    pub fn verify(&self, signed: &str, now: DateTime<Utc>) -> Result<(), CredentialError> {
        let combined = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signed)
            .map_err(|_| CredentialError::InvalidState)?;

        if combined.len() < SIGNATURE_LEN {
            return Err(CredentialError::InvalidState);
        }

        let (signature, payload) = combined.split_at(SIGNATURE_LEN);
        let mut mac = new_hmac(&self.key)?;
        mac.update(payload);
        mac.verify_slice(signature)
            .map_err(|_| CredentialError::InvalidState)?;

        let payload = std::str::from_utf8(payload).map_err(|_| CredentialError::InvalidState)?;
        let issued: i64 = payload
            .split_once('.')
            .and_then(|(ts, _)| ts.parse().ok())
            .ok_or(CredentialError::InvalidState)?;

        let age = now.timestamp() - issued;
        if !(0..=STATE_TTL_SECS).contains(&age) {
            tracing::warn!("Rejecting OAuth state issued {age}s ago");
            return Err(CredentialError::InvalidState);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_signer() -> StateSigner {
        let secret = base64::engine::general_purpose::STANDARD.encode([0x43u8; 32]);
        StateSigner::new(&secret).unwrap()
    }

    #[test]
    fn test_issue_then_verify() {
        let signer = test_signer();
        let now = Utc::now();
        let state = signer.issue(now).unwrap();
        signer.verify(&state, now + chrono::Duration::seconds(30)).unwrap();
    }

    #[test]
    fn test_tampered_state_rejected() {
        let signer = test_signer();
        let now = Utc::now();
        let state = signer.issue(now).unwrap();
        let tampered = format!("{state}X");
        assert_eq!(signer.verify(&tampered, now), Err(CredentialError::InvalidState));
    }

    #[test]
    fn test_state_from_other_key_rejected() {
        let now = Utc::now();
        let other = StateSigner::new(
            &base64::engine::general_purpose::STANDARD.encode([0x44u8; 32]),
        )
        .unwrap();
        let state = other.issue(now).unwrap();
        assert_eq!(test_signer().verify(&state, now), Err(CredentialError::InvalidState));
    }

    #[test]
    fn test_expired_state_rejected() {
        let signer = test_signer();
        let now = Utc::now();
        let state = signer.issue(now).unwrap();
        let later = now + chrono::Duration::seconds(STATE_TTL_SECS + 1);
        assert_eq!(signer.verify(&state, later), Err(CredentialError::InvalidState));
    }
}
