// [crates/wopr-models/src/auth.rs]
//! API-key and stored-credential records backing the gateway's
//! `AuthResolver`/`CredentialResolver` seams (SPEC_FULL.md §4, C14).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bearer token's resolved identity. `token_hash` is the SHA-256 hex
/// digest of the raw token — the value itself is never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub token_hash: String,
    pub tenant: String,
    pub instance_id: String,
    pub created_at: DateTime<Utc>,
}

/// A vault-encrypted upstream provider credential, scoped per tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCredential {
    pub tenant: String,
    pub provider: String,
    pub encrypted_value: String,
    pub updated_at: DateTime<Utc>,
}
