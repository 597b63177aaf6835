// [crates/wopr-vault/src/lib.rs]
//! =================================================================
//! Credit Vault (C13).
//!
//! Provider credentials and per-tenant BYOK keys are stored as JSON
//! `{iv, authTag, ciphertext}` produced by AES-256-GCM. Platform-level
//! credentials use a single symmetric key derived from a configured
//! secret; per-tenant BYOK keys use
//! `HMAC-SHA256(secret, "tenant:" + tenant_id)` so a secret rotation
//! re-derives every tenant key deterministically.
//! =================================================================

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("[VALIDATION]: secret must be non-empty")]
    EmptySecret,

    #[error("[CRYPTO]: encryption failed")]
    EncryptFailed,

    #[error("[CRYPTO]: decryption failed (wrong key or corrupted ciphertext)")]
    DecryptFailed,

    #[error("[SERIALIZATION]: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("[ENCODING]: {0}")]
    Encoding(#[from] base64::DecodeError),
}

/// On-disk / in-column representation of an encrypted secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub iv: String,
    #[serde(rename = "authTag")]
    pub auth_tag: String,
    pub ciphertext: String,
}

impl EncryptedEnvelope {
    /// Whether a raw stored string is a well-formed envelope (i.e. not
    /// plaintext that slipped past encryption). Used by `audit`.
    pub fn looks_encrypted(raw: &str) -> bool {
        serde_json::from_str::<EncryptedEnvelope>(raw).is_ok()
    }
}

/// Derives the 32-byte AES-256 key for a given tenant from a root
/// secret. Deterministic: the same `(secret, tenant_id)` pair always
/// yields the same key, so rotating the root secret re-derives every
/// tenant key without a migration pass over the BYOK table itself
/// (only the platform-level ciphertexts need re-encrypting).
pub fn derive_tenant_key(secret: &[u8], tenant_id: &str) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(b"tenant:");
    mac.update(tenant_id.as_bytes());
    let result = mac.finalize().into_bytes();
    let mut key = [0u8; 32];
    key.copy_from_slice(&result);
    key
}

/// Encrypts `plaintext` under `key` (32 bytes), producing an
/// `EncryptedEnvelope`. AES-GCM combines the tag into the ciphertext
/// output; we split it back out so the on-disk shape matches the
/// spec's `{iv, authTag, ciphertext}` triple.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<EncryptedEnvelope, VaultError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut iv_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut iv_bytes);
    let nonce = Nonce::from_slice(&iv_bytes);

    let mut sealed = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| VaultError::EncryptFailed)?;
    // `aes-gcm` appends the 16-byte tag to the ciphertext; split it so
    // the wire format carries iv/authTag/ciphertext independently.
    let tag = sealed.split_off(sealed.len() - 16);

    Ok(EncryptedEnvelope {
        iv: BASE64.encode(iv_bytes),
        auth_tag: BASE64.encode(tag),
        ciphertext: BASE64.encode(sealed),
    })
}

pub fn decrypt(key: &[u8; 32], envelope: &EncryptedEnvelope) -> Result<Vec<u8>, VaultError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let iv_bytes = BASE64.decode(&envelope.iv)?;
    let mut ciphertext = BASE64.decode(&envelope.ciphertext)?;
    let tag = BASE64.decode(&envelope.auth_tag)?;
    ciphertext.extend_from_slice(&tag);

    let nonce = Nonce::from_slice(&iv_bytes);
    cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| VaultError::DecryptFailed)
}

/// Encrypts a UTF-8 string and serializes the envelope to a JSON string
/// suitable for storing in a text column.
pub fn seal_string(key: &[u8; 32], plaintext: &str) -> Result<String, VaultError> {
    let envelope = encrypt(key, plaintext.as_bytes())?;
    Ok(serde_json::to_string(&envelope)?)
}

pub fn open_string(key: &[u8; 32], stored: &str) -> Result<String, VaultError> {
    let envelope: EncryptedEnvelope = serde_json::from_str(stored)?;
    let bytes = decrypt(key, &envelope)?;
    String::from_utf8(bytes).map_err(|_| VaultError::DecryptFailed)
}

/// A single flagged row surfaced by `audit`.
#[derive(Debug, Clone)]
pub struct PlaintextFinding {
    pub row_id: String,
    pub raw_value: String,
}

/// Scans `rows` for plaintext: a value is flagged when it is not valid
/// JSON, or when it parses but lacks one of `{iv, authTag, ciphertext}`.
pub fn audit<'a>(rows: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<PlaintextFinding> {
    rows.into_iter()
        .filter(|(_, value)| !EncryptedEnvelope::looks_encrypted(value))
        .map(|(row_id, value)| PlaintextFinding {
            row_id: row_id.to_string(),
            raw_value: value.to_string(),
        })
        .collect()
}

/// Converts a single flagged plaintext row to an encrypted envelope.
/// Already-encrypted rows are left untouched by the caller (this
/// function only ever receives flagged rows from `audit`); calling it
/// twice on the same plaintext is still safe since it just re-encrypts.
pub fn migrate_plaintext(key: &[u8; 32], plaintext: &str) -> Result<String, VaultError> {
    seal_string(key, plaintext)
}

/// Re-encrypts one stored value under a new key, decrypting first with
/// the old one. Returns the row unchanged error info on failure so the
/// caller can collect partial failures without rolling back rows that
/// already succeeded.
pub fn re_encrypt(old_key: &[u8; 32], new_key: &[u8; 32], stored: &str) -> Result<String, VaultError> {
    let plaintext = open_string(old_key, stored)?;
    seal_string(new_key, &plaintext)
}
