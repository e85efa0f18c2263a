//! Record signing and fail-closed verification.
//!
//! Signatures are always computed over the canonical encoding of a record,
//! never over ad-hoc bytes:
//!
//! ```text
//! signature = Sign_Ed25519(private_key, encode(record))
//! wire form = base64url(signature), no padding
//! ```

use base64::Engine;
use serde::Serialize;

use crate::canonical;
use crate::ed25519::Ed25519Verifier;
use crate::error::CryptoError;
use crate::types::SignatureAlgorithm;

/// Trait for signing canonical record bytes.
///
/// Implementations hold the private key; callers only ever see the public
/// half and the produced signatures.
pub trait RecordSigner {
    /// Get the algorithm used by this signer.
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Get the public key.
    fn public_key(&self) -> Result<Vec<u8>, CryptoError>;

    /// Sign data and return the raw signature bytes.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Trait for signature verification with a public key only.
pub trait SignatureVerifier {
    /// Verify a signature against a public key.
    fn verify(&self, public_key: &[u8], data: &[u8], signature: &[u8])
        -> Result<bool, CryptoError>;
}

/// Encode raw signature bytes for embedding in a record.
#[must_use]
pub fn encode_signature(signature: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(signature)
}

/// Decode an embedded signature string.
///
/// # Errors
///
/// Returns error if the string is not valid unpadded base64url.
pub fn decode_signature(signature: &str) -> Result<Vec<u8>, CryptoError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|e| CryptoError::invalid_signature(format!("invalid base64url: {e}")))
}

/// Sign a record's canonical encoding.
///
/// # Errors
///
/// Returns error if the record has no canonical form, the signer fails, or
/// the signer returns a signature of the wrong size for its algorithm.
pub fn sign_record<T, S>(record: &T, signer: &S) -> Result<String, CryptoError>
where
    T: Serialize + ?Sized,
    S: RecordSigner + ?Sized,
{
    let bytes = canonical::encode(record)?;
    let algorithm = signer.algorithm();
    let signature = signer.sign(&bytes)?;

    if signature.len() != algorithm.signature_size() {
        tracing::error!(
            algorithm = ?algorithm,
            got = signature.len(),
            expected = algorithm.signature_size(),
            "sign_record: signer returned malformed signature"
        );
        return Err(CryptoError::signing_failed(format!(
            "{algorithm:?} signature must be {} bytes, got {}",
            algorithm.signature_size(),
            signature.len()
        )));
    }
    Ok(encode_signature(&signature))
}

/// Verify a record signature using the public key only.
///
/// Fails closed: a malformed signature, a public key of the wrong length or
/// an off-curve point, an unencodable record and a tampered record all
/// return `false`. Nothing is propagated past this boundary.
#[must_use]
pub fn verify_record<T>(record: &T, signature: &str, public_key: &[u8]) -> bool
where
    T: Serialize + ?Sized,
{
    let bytes = match canonical::encode(record) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "verify_record: record has no canonical form");
            return false;
        },
    };
    verify_bytes(&bytes, signature, public_key)
}

/// Verify a signature over pre-encoded canonical bytes. Fails closed.
#[must_use]
fn verify_bytes(canonical: &[u8], signature: &str, public_key: &[u8]) -> bool {
    let raw = match decode_signature(signature) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!(error = %e, "verify_record: signature not decodable");
            return false;
        },
    };

    match Ed25519Verifier::new().verify(public_key, canonical, &raw) {
        Ok(valid) => {
            if !valid {
                tracing::debug!("verify_record: signature does not match record");
            }
            valid
        },
        Err(e) => {
            tracing::debug!(error = %e, "verify_record: malformed key or signature");
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ed25519::Ed25519Signer;

    #[test]
    fn test_sign_and_verify_record() {
        let signer = Ed25519Signer::random();
        let record = json!({"domain": "identity.access", "confidence": 0.9});

        let signature = sign_record(&record, &signer).unwrap();
        let public_key = signer.public_key().unwrap();

        assert!(verify_record(&record, &signature, &public_key));
    }

    #[test]
    fn test_signature_is_key_order_independent() {
        let signer = Ed25519Signer::random();
        let public_key = signer.public_key().unwrap();

        let signed = json!({"a": 1, "b": 2});
        let reordered: serde_json::Value = serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap();

        let signature = sign_record(&signed, &signer).unwrap();
        assert!(verify_record(&reordered, &signature, &public_key));
    }

    #[test]
    fn test_tampered_record_fails() {
        let signer = Ed25519Signer::random();
        let public_key = signer.public_key().unwrap();

        let signature = sign_record(&json!({"result": "SATISFIED"}), &signer).unwrap();
        assert!(!verify_record(
            &json!({"result": "NOT_SATISFIED"}),
            &signature,
            &public_key
        ));
    }

    #[test]
    fn test_malformed_inputs_fail_closed() {
        let signer = Ed25519Signer::random();
        let public_key = signer.public_key().unwrap();
        let record = json!({"k": "v"});
        let signature = sign_record(&record, &signer).unwrap();

        // Not base64url.
        assert!(!verify_record(&record, "***not-base64***", &public_key));
        // Truncated signature.
        assert!(!verify_record(&record, &signature[..20], &public_key));
        // Wrong-length key.
        assert!(!verify_record(&record, &signature, &public_key[..31]));
        // Empty key.
        assert!(!verify_record(&record, &signature, &[]));
    }

    #[test]
    fn test_wrong_key_fails() {
        let signer = Ed25519Signer::random();
        let other = Ed25519Signer::random();
        let record = json!({"k": "v"});
        let signature = sign_record(&record, &signer).unwrap();

        assert!(!verify_record(&record, &signature, &other.public_key().unwrap()));
    }

    #[test]
    fn test_short_signature_from_signer_rejected() {
        struct Truncating(Ed25519Signer);

        impl RecordSigner for Truncating {
            fn algorithm(&self) -> SignatureAlgorithm {
                self.0.algorithm()
            }
            fn public_key(&self) -> Result<Vec<u8>, CryptoError> {
                self.0.public_key()
            }
            fn sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
                let mut signature = self.0.sign(data)?;
                signature.truncate(32);
                Ok(signature)
            }
        }

        let err = sign_record(&json!({"k": "v"}), &Truncating(Ed25519Signer::random()))
            .unwrap_err();
        assert!(matches!(err, CryptoError::SigningFailed { .. }));
    }

    #[test]
    fn test_signature_encoding_roundtrip() {
        let raw = vec![0xfbu8; 64];
        let encoded = encode_signature(&raw);
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert_eq!(decode_signature(&encoded).unwrap(), raw);
    }
}
