//! Crypto helpers: Ed25519 keypair generation, detached envelope signatures,
//! and hex/base64 utilities. Compatible with ed25519-dalek v2 + rand_core.
//!
//! Combined key format (64 bytes):
//!   [0..32]  = private key bytes
//!   [32..64] = public key bytes
//!
//! Key material travels as hex (config files, env vars); wire signatures
//! travel as base64 inside envelopes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hex::{decode as hex_decode, encode as hex_encode};
use rand::rngs::OsRng;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, found {found}")]
    InvalidKeyLength { expected: usize, found: usize },

    #[error("invalid public key bytes")]
    InvalidPublicKey,

    #[error("invalid signature encoding")]
    InvalidSignature,

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Generate a new Ed25519 keypair and return concatenated 64-byte (private + public).
pub fn generate_keypair_bytes() -> Vec<u8> {
    let mut rng = OsRng;
    let sk = SigningKey::generate(&mut rng);
    let vk = sk.verifying_key();

    let mut combined = Vec::with_capacity(64);
    combined.extend_from_slice(&sk.to_bytes());
    combined.extend_from_slice(&vk.to_bytes());
    combined
}

/// Generate a new keypair as a hex string (config-file form).
pub fn generate_keypair_hex() -> String {
    hex_encode(generate_keypair_bytes())
}

/// Build a SigningKey from combined 64-byte keypair material.
pub fn signing_key_from_bytes(bytes: &[u8]) -> Result<SigningKey, CryptoError> {
    if bytes.len() != 64 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 64,
            found: bytes.len(),
        });
    }
    let mut sk_bytes = [0u8; 32];
    sk_bytes.copy_from_slice(&bytes[0..32]);
    Ok(SigningKey::from_bytes(&sk_bytes))
}

/// Build a SigningKey from hex-encoded combined keypair material.
pub fn signing_key_from_hex(hexstr: &str) -> Result<SigningKey, CryptoError> {
    let bytes = hex_decode(hexstr.trim())?;
    signing_key_from_bytes(&bytes)
}

/// Build a VerifyingKey from 32 public-key bytes.
pub fn verifying_key_from_bytes(bytes: &[u8]) -> Result<VerifyingKey, CryptoError> {
    if bytes.len() != 32 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 32,
            found: bytes.len(),
        });
    }
    let mut pk_arr = [0u8; 32];
    pk_arr.copy_from_slice(bytes);
    VerifyingKey::from_bytes(&pk_arr).map_err(|_| CryptoError::InvalidPublicKey)
}

/// Build a VerifyingKey from hex-encoded public key bytes.
pub fn verifying_key_from_hex(hexstr: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = hex_decode(hexstr.trim())?;
    verifying_key_from_bytes(&bytes)
}

/// Extract the public half of a combined 64-byte keypair.
pub fn public_key_bytes_from_keypair_bytes(kp_bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if kp_bytes.len() != 64 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 64,
            found: kp_bytes.len(),
        });
    }
    Ok(kp_bytes[32..64].to_vec())
}

/// Sign a message and return the detached signature as base64.
pub fn sign_detached_b64(sk: &SigningKey, message: &[u8]) -> String {
    let sig = sk.sign(message);
    BASE64.encode(sig.to_bytes())
}

/// Verify a base64 detached signature over a message.
///
/// Returns `Ok(false)` when the signature is well-formed but does not
/// verify; malformed encodings are an error.
pub fn verify_detached_b64(
    vk: &VerifyingKey,
    message: &[u8],
    sig_b64: &str,
) -> Result<bool, CryptoError> {
    let sig_bytes = BASE64
        .decode(sig_b64.trim())
        .map_err(|_| CryptoError::InvalidSignature)?;
    if sig_bytes.len() != 64 {
        return Err(CryptoError::InvalidSignature);
    }
    let mut sig_arr = [0u8; 64];
    sig_arr.copy_from_slice(&sig_bytes);
    let sig = Signature::from_bytes(&sig_arr);

    match vk.verify(message, &sig) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_keypair_length() {
        let kp = generate_keypair_bytes();
        assert_eq!(kp.len(), 64);
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let kp = generate_keypair_bytes();
        let sk = signing_key_from_bytes(&kp).expect("signing key");
        let pk = public_key_bytes_from_keypair_bytes(&kp).expect("public key");
        let vk = verifying_key_from_bytes(&pk).expect("verifying key");

        let msg = b"gossip envelope payload";
        let sig = sign_detached_b64(&sk, msg);
        assert!(verify_detached_b64(&vk, msg, &sig).expect("verify"));
    }

    #[test]
    fn test_verify_rejects_tampered_message() {
        let kp = generate_keypair_bytes();
        let sk = signing_key_from_bytes(&kp).expect("signing key");
        let vk = sk.verifying_key();

        let sig = sign_detached_b64(&sk, b"original");
        let ok = verify_detached_b64(&vk, b"tampered", &sig).expect("verify");
        assert!(!ok);
    }

    #[test]
    fn test_verify_rejects_garbage_signature() {
        let kp = generate_keypair_bytes();
        let sk = signing_key_from_bytes(&kp).expect("signing key");
        let vk = sk.verifying_key();

        let result = verify_detached_b64(&vk, b"msg", "not-base64!!!");
        assert!(result.is_err());
    }

    #[test]
    fn test_signing_key_from_hex_roundtrip() {
        let hex = generate_keypair_hex();
        let sk = signing_key_from_hex(&hex).expect("from hex");
        let sig = sign_detached_b64(&sk, b"x");
        assert!(verify_detached_b64(&sk.verifying_key(), b"x", &sig).expect("verify"));
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        assert!(signing_key_from_bytes(&[0u8; 32]).is_err());
        assert!(verifying_key_from_bytes(&[0u8; 31]).is_err());
        assert!(public_key_bytes_from_keypair_bytes(&[0u8; 63]).is_err());
    }
}
