//! API key authentication for companies.
//!
//! Keys are formatted as `ek_<company_prefix><random>` and stored as
//! SHA-256 hashes, never plaintext.

use super::{AuthContext, AuthError, Permissions};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// API key prefix.
pub const API_KEY_PREFIX: &str = "ek_";

/// API key metadata.
#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    /// Hash of the API key.
    pub key_hash: String,

    /// Company this key belongs to.
    pub company_id: Uuid,

    /// Permissions granted by this key.
    pub permissions: Permissions,

    /// Whether the key is active.
    pub active: bool,
}

/// API key validator backed by an in-memory registry.
pub struct ApiKeyValidator {
    keys: RwLock<HashMap<String, ApiKeyRecord>>,
}

impl ApiKeyValidator {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Generate a new API key.
    ///
    /// Returns (plaintext_key, key_hash); only the hash is ever stored.
    pub fn generate_key(company_id: &Uuid) -> (String, String) {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        let random_bytes: [u8; 24] = rng.gen();
        let random_part = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            random_bytes,
        );

        let company_prefix = &company_id.to_string()[..8];
        let plaintext_key = format!("{}{}{}", API_KEY_PREFIX, company_prefix, random_part);
        let key_hash = Self::hash_key(&plaintext_key);

        (plaintext_key, key_hash)
    }

    /// Hash an API key for storage.
    pub fn hash_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Register a key.
    pub fn register_key(&self, record: ApiKeyRecord) {
        let mut keys = self.keys.write().unwrap();
        keys.insert(record.key_hash.clone(), record);
    }

    /// Validate a key and return the auth context.
    pub fn validate(&self, key: &str) -> Result<AuthContext, AuthError> {
        if !key.starts_with(API_KEY_PREFIX) {
            return Err(AuthError::InvalidApiKey);
        }

        let key_hash = Self::hash_key(key);
        let keys = self.keys.read().unwrap();
        let record = keys.get(&key_hash).ok_or(AuthError::InvalidApiKey)?;

        if !record.active {
            return Err(AuthError::InvalidApiKey);
        }

        Ok(AuthContext {
            company_id: record.company_id,
            permissions: record.permissions.clone(),
        })
    }

    /// Revoke a key.
    pub fn revoke(&self, key_hash: &str) {
        let mut keys = self.keys.write().unwrap();
        if let Some(record) = keys.get_mut(key_hash) {
            record.active = false;
        }
    }
}

impl Default for ApiKeyValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Database-backed API key store.
#[async_trait::async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn get_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, AuthError>;

    async fn store(&self, record: &ApiKeyRecord) -> Result<(), AuthError>;

    async fn revoke(&self, key_hash: &str) -> Result<(), AuthError>;

    async fn list_for_company(&self, company_id: &Uuid) -> Result<Vec<ApiKeyRecord>, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_carry_prefix_and_hash() {
        let company_id = Uuid::new_v4();
        let (key, hash) = ApiKeyValidator::generate_key(&company_id);

        assert!(key.starts_with(API_KEY_PREFIX));
        assert_eq!(hash.len(), 64); // SHA-256 hex
    }

    #[test]
    fn registered_key_validates() {
        let validator = ApiKeyValidator::new();
        let company_id = Uuid::new_v4();
        let (key, hash) = ApiKeyValidator::generate_key(&company_id);

        validator.register_key(ApiKeyRecord {
            key_hash: hash,
            company_id,
            permissions: Permissions::read_write(),
            active: true,
        });

        let context = validator.validate(&key).unwrap();
        assert_eq!(context.company_id, company_id);
        assert!(context.can_read());
        assert!(context.can_write());
        assert!(!context.is_admin());
    }

    #[test]
    fn unknown_key_is_rejected() {
        let validator = ApiKeyValidator::new();
        assert!(validator.validate("ek_unknown").is_err());
        assert!(validator.validate("wrong_prefix").is_err());
    }

    #[test]
    fn revoked_key_stops_working() {
        let validator = ApiKeyValidator::new();
        let company_id = Uuid::new_v4();
        let (key, hash) = ApiKeyValidator::generate_key(&company_id);

        validator.register_key(ApiKeyRecord {
            key_hash: hash.clone(),
            company_id,
            permissions: Permissions::read_write(),
            active: true,
        });

        assert!(validator.validate(&key).is_ok());
        validator.revoke(&hash);
        assert!(validator.validate(&key).is_err());
    }
}
