use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};

/// HMAC digest algorithm used for payload signatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl SignatureAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha256 => "sha256",
            SignatureAlgorithm::Sha512 => "sha512",
        }
    }
}

/// Compute the HMAC signature over an outgoing body.
///
/// Pure function: identical inputs always yield the identical lowercase
/// hex digest.
pub fn sign(secret: &[u8], raw_body: &[u8], algorithm: SignatureAlgorithm) -> String {
    match algorithm {
        SignatureAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret)
                .expect("hmac accepts keys of any length");
            mac.update(raw_body);
            hex::encode(mac.finalize().into_bytes())
        }
        SignatureAlgorithm::Sha512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(secret)
                .expect("hmac accepts keys of any length");
            mac.update(raw_body);
            hex::encode(mac.finalize().into_bytes())
        }
    }
}

/// Format a digest for the outgoing signature header, e.g.
/// `sha256=ab12...`.
pub fn header_value(digest: &str, algorithm: SignatureAlgorithm) -> String {
    format!("{}={}", algorithm.as_str(), digest)
}

/// Split a `{algorithm}={hex}` header value back into its parts.
///
/// Returns `None` when the prefix names no supported algorithm.
pub fn parse_header_value(value: &str) -> Option<(SignatureAlgorithm, &str)> {
    let (alg, digest) = value.split_once('=')?;
    match alg {
        "sha256" => Some((SignatureAlgorithm::Sha256, digest)),
        "sha512" => Some((SignatureAlgorithm::Sha512, digest)),
        _ => None,
    }
}

/// Verify a received signature in constant time.
///
/// Receivers of our webhooks can reuse this for inbound verification;
/// the comparison goes through the MAC itself rather than string
/// equality, so digest mismatches cannot be timed.
pub fn verify(
    secret: &[u8],
    raw_body: &[u8],
    algorithm: SignatureAlgorithm,
    digest_hex: &str,
) -> bool {
    let Ok(received) = hex::decode(digest_hex) else {
        return false;
    };

    match algorithm {
        SignatureAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret)
                .expect("hmac accepts keys of any length");
            mac.update(raw_body);
            mac.verify_slice(&received).is_ok()
        }
        SignatureAlgorithm::Sha512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(secret)
                .expect("hmac accepts keys of any length");
            mac.update(raw_body);
            mac.verify_slice(&received).is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_and_input_sensitive() {
        let a = sign(b"secret", b"body", SignatureAlgorithm::Sha256);
        let b = sign(b"secret", b"body", SignatureAlgorithm::Sha256);
        assert_eq!(a, b);

        assert_ne!(a, sign(b"secret", b"bodY", SignatureAlgorithm::Sha256));
        assert_ne!(a, sign(b"secreT", b"body", SignatureAlgorithm::Sha256));
    }

    #[test]
    fn digest_lengths() {
        assert_eq!(sign(b"k", b"p", SignatureAlgorithm::Sha256).len(), 64);
        assert_eq!(sign(b"k", b"p", SignatureAlgorithm::Sha512).len(), 128);
    }

    #[test]
    fn header_round_trip() {
        let digest = sign(b"k", b"p", SignatureAlgorithm::Sha512);
        let header = header_value(&digest, SignatureAlgorithm::Sha512);
        assert!(header.starts_with("sha512="));

        let (alg, parsed) = parse_header_value(&header).unwrap();
        assert_eq!(alg, SignatureAlgorithm::Sha512);
        assert_eq!(parsed, digest);
    }

    #[test]
    fn verify_accepts_valid_rejects_tampered() {
        let digest = sign(b"k", b"payload", SignatureAlgorithm::Sha256);
        assert!(verify(b"k", b"payload", SignatureAlgorithm::Sha256, &digest));
        assert!(!verify(b"k", b"payload2", SignatureAlgorithm::Sha256, &digest));
        assert!(!verify(b"k", b"payload", SignatureAlgorithm::Sha256, "zz-not-hex"));
    }
}
