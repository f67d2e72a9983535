// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! secp256k1 helpers for copayer identities and signatures.
//!
//! Request keys, xPubKeys and wallet keys are hex-encoded compressed SEC1
//! public keys. Signatures are hex DER (or 64-byte compact) ECDSA signatures
//! over the SHA-256 digest of the signed text.

use hmac::{Hmac, Mac};
use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid signature encoding")]
    InvalidSignature,
}

/// Parse a hex-encoded SEC1 public key.
pub fn parse_public_key(pub_key_hex: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = hex::decode(pub_key_hex)?;
    VerifyingKey::from_sec1_bytes(&bytes).map_err(|_| CryptoError::InvalidPublicKey)
}

/// Parse a private key given as 32-byte hex or PKCS#8 PEM.
pub fn parse_signing_key(raw: &str) -> Result<SigningKey, CryptoError> {
    let raw = raw.trim();
    if raw.starts_with("-----BEGIN") {
        use k256::pkcs8::DecodePrivateKey;
        return SigningKey::from_pkcs8_pem(raw)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()));
    }
    let bytes = hex::decode(raw)?;
    SigningKey::from_slice(&bytes).map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))
}

/// Compressed public key of a signing key, hex encoded.
pub fn public_key_hex(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().to_encoded_point(true).as_bytes())
}

/// Sign `text` and return the DER signature as hex.
pub fn sign_message(key: &SigningKey, text: &str) -> String {
    let signature: Signature = key.sign(text.as_bytes());
    hex::encode(signature.to_der().as_bytes())
}

fn parse_signature(signature_hex: &str) -> Result<Signature, CryptoError> {
    let bytes = hex::decode(signature_hex)?;
    let signature = Signature::from_der(&bytes)
        .or_else(|_| Signature::from_slice(&bytes))
        .map_err(|_| CryptoError::InvalidSignature)?;
    Ok(signature.normalize_s().unwrap_or(signature))
}

/// Verify `signature_hex` over `text` against `pub_key_hex`.
///
/// Malformed keys or signatures verify as `false`.
pub fn verify_message(text: &str, signature_hex: &str, pub_key_hex: &str) -> bool {
    let Ok(key) = parse_public_key(pub_key_hex) else {
        return false;
    };
    let Ok(signature) = parse_signature(signature_hex) else {
        return false;
    };
    key.verify(text.as_bytes(), &signature).is_ok()
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

pub fn double_sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(&sha256(data)))
}

/// HMAC-SHA256 of `message` keyed by `key`.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// Text a joining copayer signs with the wallet's private key.
pub fn copayer_hash(name: &str, x_pub_key: &str, request_pub_key: &str) -> String {
    format!("{name}|{x_pub_key}|{request_pub_key}")
}
