//! HMAC-SHA256 request signing.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex signature of the raw request body.
pub const SIGNATURE_HEADER: &str = "X-LeadScout-Signature";

/// Hex-encoded HMAC-SHA256 of `body` under the tenant's webhook secret.
#[must_use]
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a received signature. Receivers use this; the
/// engine only signs.
#[must_use]
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let expected = sign(secret, body);
    let received = signature.trim().to_ascii_lowercase();
    expected.as_bytes().ct_eq(received.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_64_hex_chars() {
        let sig = sign("whsec", br#"{"event":"new_leads"}"#);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2.
        assert_eq!(
            sign("Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_accepts_own_signature_only() {
        let body = b"payload";
        let sig = sign("a", body);
        assert!(verify("a", body, &sig));
        assert!(verify("a", body, &sig.to_uppercase()));
        assert!(!verify("b", body, &sig));
        assert!(!verify("a", b"payload2", &sig));
        assert!(!verify("a", body, ""));
    }
}
