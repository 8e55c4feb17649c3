use anyhow::{anyhow, bail};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::OffsetDateTime;

type HmacSha256 = Hmac<Sha256>;

// Replay tolerance for the signature timestamp.
const TOLERANCE_SECS: i64 = 300;

/// Parse a `Stripe-Signature` header of the form `t=<ts>,v1=<hex sig>`.
pub fn parse_signature_header(header: &str) -> anyhow::Result<(i64, String)> {
    let mut timestamp = None;
    let mut v1 = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => v1 = Some(value.to_string()),
            _ => {}
        }
    }
    match (timestamp, v1) {
        (Some(t), Some(sig)) => Ok((t, sig)),
        _ => Err(anyhow!("invalid signature header format")),
    }
}

/// Verify an HMAC-SHA256 webhook signature over `"{timestamp}.{payload}"`.
/// Comparison is constant-time; timestamps outside the tolerance window are
/// rejected to stop replays.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str) -> anyhow::Result<()> {
    let (timestamp, v1) = parse_signature_header(header)?;

    let now = OffsetDateTime::now_utc().unix_timestamp();
    if (now - timestamp).abs() > TOLERANCE_SECS {
        bail!("signature timestamp outside tolerance window");
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| anyhow!("invalid webhook secret"))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let sig = hex::decode(&v1).map_err(|_| anyhow!("signature is not hex"))?;
    mac.verify_slice(&sig)
        .map_err(|_| anyhow!("signature mismatch"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &[u8], timestamp: i64, secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn parses_well_formed_headers() {
        let (t, v1) = parse_signature_header("t=1609459200,v1=abcdef1234567890").unwrap();
        assert_eq!(t, 1609459200);
        assert_eq!(v1, "abcdef1234567890");
    }

    #[test]
    fn rejects_malformed_headers() {
        assert!(parse_signature_header("garbage").is_err());
        assert!(parse_signature_header("t=123").is_err());
        assert!(parse_signature_header("v1=abc").is_err());
    }

    #[test]
    fn accepts_a_fresh_valid_signature() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let header = sign(payload, now, "whsec_test");
        assert!(verify_signature(payload, &header, "whsec_test").is_ok());
    }

    #[test]
    fn rejects_a_wrong_secret() {
        let payload = b"{}";
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let header = sign(payload, now, "whsec_test");
        assert!(verify_signature(payload, &header, "whsec_other").is_err());
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let header = sign(b"{}", now, "whsec_test");
        assert!(verify_signature(b"{\"evil\":true}", &header, "whsec_test").is_err());
    }

    #[test]
    fn rejects_a_stale_timestamp() {
        let payload = b"{}";
        let stale = OffsetDateTime::now_utc().unix_timestamp() - 3600;
        let header = sign(payload, stale, "whsec_test");
        assert!(verify_signature(payload, &header, "whsec_test").is_err());
    }
}
