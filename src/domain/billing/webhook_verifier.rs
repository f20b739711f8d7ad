//! Stripe webhook signature verification.
//!
//! Implements verification of Stripe webhook signatures using HMAC-SHA256.
//! Includes timestamp validation to prevent replay attacks.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::stripe_event::StripeEvent;
use super::webhook_errors::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed age for webhook events (5 minutes).
const MAX_EVENT_AGE_SECS: i64 = 300;

/// Maximum allowed clock skew for future events (1 minute).
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Parsed components from the Stripe-Signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Unix timestamp when the signature was generated.
    pub timestamp: i64,
    /// v1 signatures (HMAC-SHA256). Several are sent while a secret is rolled.
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parses a Stripe-Signature header string.
    ///
    /// Format: `t=<timestamp>,v1=<signature>[,v1=<signature>][,v0=<legacy>]`
    pub fn parse(header: &str) -> Result<Self, WebhookError> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| WebhookError::ParseError("invalid header format".to_string()))?;

            match key {
                "t" => {
                    timestamp = Some(value.parse().map_err(|_| {
                        WebhookError::ParseError("invalid timestamp".to_string())
                    })?);
                }
                "v1" => {
                    v1_signatures.push(hex::decode(value).map_err(|_| {
                        WebhookError::ParseError("invalid v1 signature hex".to_string())
                    })?);
                }
                // v0 and unknown schemes are not trusted
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| WebhookError::ParseError("missing timestamp".to_string()))?;
        if v1_signatures.is_empty() {
            return Err(WebhookError::ParseError("missing v1 signature".to_string()));
        }

        Ok(SignatureHeader {
            timestamp,
            v1_signatures,
        })
    }
}

/// Verifier for Stripe webhook signatures.
#[derive(Clone)]
pub struct StripeWebhookVerifier {
    secret: Option<SecretString>,
}

impl StripeWebhookVerifier {
    /// Creates a verifier. An empty secret makes every delivery fail verification.
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        Self {
            secret: (!secret.trim().is_empty()).then(|| SecretString::new(secret)),
        }
    }

    /// Verifies the webhook signature and parses the event.
    ///
    /// Nothing in the payload is looked at until the signature checks out.
    pub fn verify_and_parse(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<StripeEvent, WebhookError> {
        let secret = self.secret.as_ref().ok_or(WebhookError::MissingSecret)?;
        let signature_header = signature_header
            .filter(|h| !h.trim().is_empty())
            .ok_or(WebhookError::MissingSignature)?;
        if payload.is_empty() {
            return Err(WebhookError::EmptyPayload);
        }

        let header = SignatureHeader::parse(signature_header)?;
        validate_timestamp(header.timestamp, chrono::Utc::now().timestamp())?;

        let expected = compute_signature(secret.expose_secret(), header.timestamp, payload)?;
        if !header
            .v1_signatures
            .iter()
            .any(|candidate| constant_time_compare(&expected, candidate))
        {
            return Err(WebhookError::InvalidSignature);
        }

        serde_json::from_slice(payload).map_err(|e| WebhookError::ParseError(e.to_string()))
    }
}

/// Builds a `Stripe-Signature` header value for a payload.
///
/// Used by replay tooling and tests to produce deliveries the verifier accepts.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, WebhookError> {
    let signature = compute_signature(secret, timestamp, payload)?;
    Ok(format!("t={},v1={}", timestamp, hex::encode(signature)))
}

fn validate_timestamp(timestamp: i64, now: i64) -> Result<(), WebhookError> {
    let age = now - timestamp;

    if age > MAX_EVENT_AGE_SECS {
        return Err(WebhookError::TimestampOutOfRange);
    }
    if age < -MAX_CLOCK_SKEW_SECS {
        return Err(WebhookError::InvalidTimestamp);
    }
    Ok(())
}

/// HMAC-SHA256 over `"{timestamp}.{payload}"`.
fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::MissingSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time comparison so timing does not leak the expected signature.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "whsec_test_secret_12345";

    fn payload() -> Vec<u8> {
        serde_json::json!({
            "id": "evt_1",
            "type": "invoice.paid",
            "created": chrono::Utc::now().timestamp(),
            "data": { "object": { "id": "in_1" } },
            "livemode": false,
            "api_version": "2023-10-16"
        })
        .to_string()
        .into_bytes()
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    // ══════════════════════════════════════════════════════════════
    // SignatureHeader Parsing
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn parses_header_with_multiple_v1_signatures() {
        let header = SignatureHeader::parse("t=1700000000,v1=abcd,v1=ef01,v0=9999").unwrap();
        assert_eq!(header.timestamp, 1_700_000_000);
        assert_eq!(header.v1_signatures.len(), 2);
    }

    #[test]
    fn rejects_header_without_v1() {
        assert!(matches!(
            SignatureHeader::parse("t=1700000000,v0=abcd"),
            Err(WebhookError::ParseError(_))
        ));
    }

    #[test]
    fn rejects_header_without_timestamp() {
        assert!(SignatureHeader::parse("v1=abcd").is_err());
    }

    #[test]
    fn rejects_non_hex_signature() {
        assert!(SignatureHeader::parse("t=1,v1=not-hex").is_err());
    }

    // ══════════════════════════════════════════════════════════════
    // Verification
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn accepts_correctly_signed_payload() {
        let body = payload();
        let header = signature_header(TEST_SECRET, now(), &body).unwrap();
        let verifier = StripeWebhookVerifier::new(TEST_SECRET);

        let event = verifier.verify_and_parse(&body, Some(&header)).unwrap();
        assert_eq!(event.id, "evt_1");
    }

    #[test]
    fn rejects_payload_signed_with_other_secret() {
        let body = payload();
        let header = signature_header("whsec_other", now(), &body).unwrap();
        let verifier = StripeWebhookVerifier::new(TEST_SECRET);

        assert!(matches!(
            verifier.verify_and_parse(&body, Some(&header)),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn rejects_tampered_payload() {
        let body = payload();
        let header = signature_header(TEST_SECRET, now(), &body).unwrap();
        let mut tampered = body.clone();
        tampered.extend_from_slice(b" ");

        let verifier = StripeWebhookVerifier::new(TEST_SECRET);
        assert!(matches!(
            verifier.verify_and_parse(&tampered, Some(&header)),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn missing_secret_rejects_everything() {
        let body = payload();
        let header = signature_header(TEST_SECRET, now(), &body).unwrap();
        let verifier = StripeWebhookVerifier::new("");

        assert!(matches!(
            verifier.verify_and_parse(&body, Some(&header)),
            Err(WebhookError::MissingSecret)
        ));
    }

    #[test]
    fn missing_signature_is_rejected() {
        let verifier = StripeWebhookVerifier::new(TEST_SECRET);
        assert!(matches!(
            verifier.verify_and_parse(&payload(), None),
            Err(WebhookError::MissingSignature)
        ));
        assert!(matches!(
            verifier.verify_and_parse(&payload(), Some("  ")),
            Err(WebhookError::MissingSignature)
        ));
    }

    #[test]
    fn empty_body_is_rejected() {
        let header = signature_header(TEST_SECRET, now(), b"").unwrap();
        let verifier = StripeWebhookVerifier::new(TEST_SECRET);
        assert!(matches!(
            verifier.verify_and_parse(b"", Some(&header)),
            Err(WebhookError::EmptyPayload)
        ));
    }

    #[test]
    fn stale_signature_is_rejected() {
        let body = payload();
        let header = signature_header(TEST_SECRET, now() - 301, &body).unwrap();
        let verifier = StripeWebhookVerifier::new(TEST_SECRET);
        assert!(matches!(
            verifier.verify_and_parse(&body, Some(&header)),
            Err(WebhookError::TimestampOutOfRange)
        ));
    }

    #[test]
    fn small_future_skew_is_tolerated() {
        assert!(validate_timestamp(1_030, 1_000).is_ok());
        assert!(matches!(
            validate_timestamp(1_061, 1_000),
            Err(WebhookError::InvalidTimestamp)
        ));
    }

    #[test]
    fn signed_garbage_is_a_parse_error() {
        let body = b"not json".to_vec();
        let header = signature_header(TEST_SECRET, now(), &body).unwrap();
        let verifier = StripeWebhookVerifier::new(TEST_SECRET);
        assert!(matches!(
            verifier.verify_and_parse(&body, Some(&header)),
            Err(WebhookError::ParseError(_))
        ));
    }
}
