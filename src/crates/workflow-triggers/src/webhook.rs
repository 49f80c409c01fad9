//! Webhook signature verification: HMAC-SHA256 of the
//! raw request body against the start block's `webhook_secret`, plus a
//! replay window on `X-Webhook-Timestamp`. Grounded the same way
//! `shipper::webhook`'s outbound signer builds one, run in reverse for
//! verification instead of signing.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{Result, TriggerError};

type HmacSha256 = Hmac<Sha256>;

/// Default replay window.
pub const DEFAULT_REPLAY_WINDOW_SECS: i64 = 300;

/// Verifies `X-Webhook-Signature: sha256=<hex>` against `raw_body` using
/// `secret`, then checks `timestamp` falls within `window_secs` of `now`.
pub fn verify(secret: &str, raw_body: &[u8], signature_header: &str, timestamp: i64, now: i64, window_secs: i64) -> Result<()> {
    let hex_sig = signature_header
        .strip_prefix("sha256=")
        .ok_or(TriggerError::BadSignature)?;
    let provided = decode_hex(hex_sig).ok_or(TriggerError::BadSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(raw_body);
    let expected = mac.finalize().into_bytes();

    if expected.ct_eq(&provided[..]).unwrap_u8() != 1 {
        return Err(TriggerError::SignatureMismatch);
    }
    if (now - timestamp).abs() > window_secs {
        return Err(TriggerError::ReplayWindowExceeded);
    }
    Ok(())
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let bytes = mac.finalize().into_bytes();
        let mut hex = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            hex.push_str(&format!("{b:02x}"));
        }
        format!("sha256={hex}")
    }

    #[test]
    fn accepts_a_correctly_signed_body_within_window() {
        let body = br#"{"hello":"world"}"#;
        let sig = sign("shh", body);
        verify("shh", body, &sig, 1000, 1010, DEFAULT_REPLAY_WINDOW_SECS).unwrap();
    }

    #[test]
    fn rejects_a_tampered_body() {
        let body = br#"{"hello":"world"}"#;
        let sig = sign("shh", body);
        let tampered = br#"{"hello":"wormd"}"#;
        assert!(matches!(
            verify("shh", tampered, &sig, 1000, 1010, DEFAULT_REPLAY_WINDOW_SECS),
            Err(TriggerError::SignatureMismatch)
        ));
    }

    #[test]
    fn rejects_a_replayed_timestamp() {
        let body = b"{}";
        let sig = sign("shh", body);
        let err = verify("shh", body, &sig, 1000, 1000 + DEFAULT_REPLAY_WINDOW_SECS + 1, DEFAULT_REPLAY_WINDOW_SECS);
        assert!(matches!(err, Err(TriggerError::ReplayWindowExceeded)));
    }

    #[test]
    fn rejects_a_malformed_header() {
        let err = verify("shh", b"{}", "not-a-signature", 1000, 1000, DEFAULT_REPLAY_WINDOW_SECS);
        assert!(matches!(err, Err(TriggerError::BadSignature)));
    }
}
