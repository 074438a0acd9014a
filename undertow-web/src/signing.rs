//! Capability URLs signed with a per-instance ed25519 key.
//!
//! A URL is issued as `/file?folder=<id>&path=<p>&signature=<hex>`, where the
//! signature covers the exact path and query text preceding `&signature=`.
//! Verification strips the signature parameter, rebuilds that text from the
//! request URI as received and checks it against the instance's public key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use rand::{Rng, rng};
use undertow_core::FolderId;

/// Route the issued URLs point at.
pub const FILE_ROUTE: &str = "/file";

const SIGNATURE_PARAM: &str = "signature=";

/// Reasons a request URI fails signature verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SigningError {
    #[error("Request carries no signature")]
    MissingSignature,

    #[error("Malformed signature: {reason}")]
    Malformed { reason: String },

    #[error("Signature does not match request")]
    Invalid,
}

/// Issues and verifies capability URLs for one server instance.
///
/// The key lives only in memory; URLs issued by a previous process never
/// verify against a new one.
pub struct UrlSigner {
    key: SigningKey,
}

impl UrlSigner {
    /// Generates a fresh random keypair.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rng().fill(&mut seed);
        Self::from_seed(seed)
    }

    /// Builds a signer from a fixed seed, for reproducible tests.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Hex-encoded public key, for diagnostics.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    /// Returns the signed URL for `path` within `folder`.
    pub fn issue_url(&self, folder: &FolderId, path: &str) -> String {
        let unsigned = format!(
            "{FILE_ROUTE}?folder={}&path={}",
            urlencoding::encode(folder.as_str()),
            urlencoding::encode(path)
        );
        let signature = self.key.sign(unsigned.as_bytes());
        format!(
            "{unsigned}&{SIGNATURE_PARAM}{}",
            hex::encode(signature.to_bytes())
        )
    }

    /// Verifies a request's path and query against this instance's key.
    ///
    /// # Errors
    ///
    /// - `SigningError::MissingSignature` - If there is no `signature` parameter
    /// - `SigningError::Malformed` - If the signature is not 64 hex-encoded bytes
    ///   or appears more than once
    /// - `SigningError::Invalid` - If the signature does not cover this request
    pub fn verify(&self, path_and_query: &str) -> Result<(), SigningError> {
        let (path, query) = path_and_query
            .split_once('?')
            .ok_or(SigningError::MissingSignature)?;

        let mut signature = None;
        let mut signed_params = Vec::new();
        for param in query.split('&') {
            match param.strip_prefix(SIGNATURE_PARAM) {
                Some(_) if signature.is_some() => {
                    return Err(SigningError::Malformed {
                        reason: "signature given more than once".to_string(),
                    });
                }
                Some(value) => signature = Some(value),
                None => signed_params.push(param),
            }
        }

        let signature = signature.ok_or(SigningError::MissingSignature)?;
        let bytes = hex::decode(signature).map_err(|e| SigningError::Malformed {
            reason: e.to_string(),
        })?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| SigningError::Malformed {
                reason: format!("expected 64 bytes, got {}", bytes.len()),
            })?;

        let payload = format!("{path}?{}", signed_params.join("&"));
        self.key
            .verifying_key()
            .verify(payload.as_bytes(), &Signature::from_bytes(&bytes))
            .map_err(|_| SigningError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> UrlSigner {
        UrlSigner::from_seed([7; 32])
    }

    #[test]
    fn test_issued_url_verifies() {
        let signer = signer();
        let url = signer.issue_url(&FolderId::new("movies"), "Season 1/ep 01.mkv");

        assert!(url.starts_with("/file?folder=movies&path=Season%201%2Fep%2001.mkv&signature="));
        assert_eq!(signer.verify(&url), Ok(()));
    }

    #[test]
    fn test_tampered_path_is_rejected() {
        let signer = signer();
        let url = signer.issue_url(&FolderId::new("movies"), "a.mkv");
        let tampered = url.replace("path=a.mkv", "path=b.mkv");

        assert_eq!(signer.verify(&tampered), Err(SigningError::Invalid));
    }

    #[test]
    fn test_other_instance_key_is_rejected() {
        let url = signer().issue_url(&FolderId::new("movies"), "a.mkv");
        let other = UrlSigner::from_seed([8; 32]);

        assert_eq!(other.verify(&url), Err(SigningError::Invalid));
    }

    #[test]
    fn test_missing_signature() {
        assert_eq!(
            signer().verify("/file?folder=movies&path=a.mkv"),
            Err(SigningError::MissingSignature)
        );
        assert_eq!(signer().verify("/file"), Err(SigningError::MissingSignature));
    }

    #[test]
    fn test_malformed_signature() {
        let result = signer().verify("/file?folder=movies&path=a.mkv&signature=zz");
        assert!(matches!(result, Err(SigningError::Malformed { .. })));

        let result = signer().verify("/file?folder=movies&path=a.mkv&signature=abcd");
        assert!(matches!(result, Err(SigningError::Malformed { .. })));
    }

    #[test]
    fn test_duplicate_signature_is_rejected() {
        let signer = signer();
        let url = signer.issue_url(&FolderId::new("movies"), "a.mkv");
        let signature = url.rsplit_once('=').unwrap().1;
        let doubled = format!("{url}&signature={signature}");

        assert!(matches!(
            signer.verify(&doubled),
            Err(SigningError::Malformed { .. })
        ));
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(
            UrlSigner::generate().public_key_hex(),
            UrlSigner::generate().public_key_hex()
        );
    }
}
