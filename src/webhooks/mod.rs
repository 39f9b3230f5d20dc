/// Outbound webhook delivery and HMAC signing helpers
pub mod operator_alerts;

pub use operator_alerts::{OperatorAlert, OperatorAlertService};

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 signer producing lowercase hex digests
pub struct SignatureGenerator {
    secret: String,
}

impl SignatureGenerator {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// Hex HMAC of an arbitrary message
    pub fn sign(&self, message: &str) -> String {
        // HMAC accepts keys of any length, so this only fails on an empty digest type
        let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.as_bytes()) else {
            return String::new();
        };
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Generate HMAC signature for webhook payload (`"{timestamp}.{body}"`)
    pub fn sign_payload(&self, timestamp: &str, body: &str) -> String {
        self.sign(&format!("{}.{}", timestamp, body))
    }

    /// Constant-time check of a hex signature over `message`
    pub fn verify(&self, message: &str, signature: &str) -> bool {
        constant_time_eq(&self.sign(message), &signature.to_ascii_lowercase())
    }
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_hex_sha256() {
        let generator = SignatureGenerator::new("test_secret".to_string());
        let sig = generator.sign_payload("1717000000", r#"{"type":"checkout_inconsistent"}"#);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn verify_accepts_matching_and_rejects_tampered() {
        let generator = SignatureGenerator::new("rzp_secret".to_string());
        let sig = generator.sign("order_1|pay_1");
        assert!(generator.verify("order_1|pay_1", &sig));
        assert!(generator.verify("order_1|pay_1", &sig.to_uppercase()));
        assert!(!generator.verify("order_1|pay_2", &sig));
        assert!(!generator.verify("order_1|pay_1", "deadbeef"));
    }

    #[test]
    fn constant_time_eq_compares_lengths() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(!constant_time_eq("abc", "abd"));
    }
}
