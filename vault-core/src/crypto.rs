//! Ed25519 signing, key-ID derivation, and the SHA-256 helpers that sit
//! directly on top of the canonical encoder.

use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::{CryptoRng, RngCore};

use crate::error::{VaultError, VaultErrorKind};

/// Prefix applied to every derived key ID.
pub const KEY_ID_PREFIX: &str = "bp1_";

/// An Ed25519 keypair. Private key material lives only in this buffer and is
/// zeroized by `ed25519-dalek` when it is dropped.
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a new random keypair.
    pub fn generate<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let signing_key = SigningKey::generate(rng);
        let verifying_key = VerifyingKey::from(&signing_key);
        KeyPair { signing_key, verifying_key }
    }

    /// Build a keypair from a 32-byte Ed25519 seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = VerifyingKey::from(&signing_key);
        KeyPair { signing_key, verifying_key }
    }

    /// The 32-byte public key.
    pub fn public_key(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// The derived key ID: `bp1_` + first 16 hex chars of SHA-256(public key).
    pub fn key_id(&self) -> String {
        derive_key_id(&self.public_key())
    }

    /// Sign a message, returning the raw 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// The raw 32-byte seed. Callers are responsible for keeping this out of
    /// the vault directory; vault-core never writes it to disk.
    pub fn seed_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

/// Derive a key ID from raw public key bytes.
///
/// `key_id = "bp1_" + hex(SHA-256(public_key))[0..16]`
pub fn derive_key_id(public_key_bytes: &[u8; 32]) -> String {
    let hash = jcs_rs::sha256(public_key_bytes);
    format!("{KEY_ID_PREFIX}{}", hex::encode(&hash[0..8]))
}

/// Verify a 64-byte Ed25519 signature over `message` under `public_key`.
/// Returns `Ok(true)`/`Ok(false)` for well-formed inputs; only malformed
/// keys or signature encodings raise an error.
pub fn verify_signature(
    message: &[u8],
    signature_bytes: &[u8],
    public_key: &[u8; 32],
) -> Result<bool, VaultError> {
    if signature_bytes.len() != 64 {
        return Err(VaultError::new(
            VaultErrorKind::SignatureInvalid,
            format!("expected 64-byte signature, got {}", signature_bytes.len()),
        ));
    }
    let signature = Signature::from_slice(signature_bytes).map_err(|e| {
        VaultError::new(VaultErrorKind::SignatureInvalid, "malformed signature encoding")
            .with_source(e)
    })?;
    let verifying_key = VerifyingKey::from_bytes(public_key).map_err(|e| {
        VaultError::new(VaultErrorKind::SignatureInvalid, "malformed public key").with_source(e)
    })?;

    Ok(verifying_key.verify(message, &signature).is_ok())
}

/// Decode a Base64-encoded Ed25519 signature.
pub fn decode_signature_b64(signature_b64: &str) -> Result<Vec<u8>, VaultError> {
    base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|e| {
            VaultError::new(VaultErrorKind::SignatureInvalid, "invalid base64 signature")
                .with_source(e)
        })
}

/// Import a 32-byte public key from a Base64-encoded string.
pub fn import_public_key_b64(key_b64: &str) -> Result<[u8; 32], VaultError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(key_b64)
        .map_err(|e| {
            VaultError::new(VaultErrorKind::KeyNotAuthorized, "invalid base64 public key")
                .with_source(e)
        })?;

    if bytes.len() != 32 {
        return Err(VaultError::new(
            VaultErrorKind::KeyNotAuthorized,
            format!("public key must be 32 bytes, got {}", bytes.len()),
        ));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Base64-encode a public key.
pub fn encode_public_key_b64(public_key: &[u8; 32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(public_key)
}
