//! One-time code verification for signing recipients.
//!
//! Codes are stored hashed, never plaintext. Each generated code carries
//! its own attempt counter; exhausting it locks the recipient out for a
//! cool-down window during which even a correct code is rejected. A new
//! code resets the counter, successful verification clears all state.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
#[cfg(test)]
use mockall::automock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::RecipientId;
use crate::infra::{EngineError, Result};

/// Per-recipient OTP state. One row per recipient; replaced on each
/// issuance, deleted on successful verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpState {
    pub code_hash: String,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
}

/// Storage for OTP state.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OtpStore: Send + Sync {
    async fn get(&self, recipient_id: RecipientId) -> Result<Option<OtpState>>;

    async fn put(&self, recipient_id: RecipientId, state: OtpState) -> Result<()>;

    async fn clear(&self, recipient_id: RecipientId) -> Result<()>;
}

/// OTP policy knobs.
#[derive(Debug, Clone)]
pub struct OtpConfig {
    /// Number of digits in a code.
    pub digits: u32,
    /// Wrong guesses allowed per issued code.
    pub max_attempts: u32,
    /// Lockout window after the attempts are exhausted.
    pub lockout: Duration,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            digits: 6,
            max_attempts: 5,
            lockout: Duration::minutes(15),
        }
    }
}

/// OTP service over a pluggable store.
pub struct OtpService {
    store: std::sync::Arc<dyn OtpStore>,
    config: OtpConfig,
}

impl OtpService {
    pub fn new(store: std::sync::Arc<dyn OtpStore>, config: OtpConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &OtpConfig {
        &self.config
    }

    /// Generate and persist a fresh code for the recipient, resetting any
    /// prior attempt counter. Returns the plaintext code for delivery;
    /// only its hash is stored.
    pub async fn generate(
        &self,
        recipient_id: RecipientId,
        expiry_minutes: u32,
    ) -> Result<String> {
        let code = random_code(self.config.digits);
        let now = Utc::now();

        let state = OtpState {
            code_hash: hash_code(&code),
            expires_at: now + Duration::minutes(i64::from(expiry_minutes)),
            attempts: 0,
            locked_until: None,
            issued_at: now,
        };
        self.store.put(recipient_id, state).await?;

        Ok(code)
    }

    /// Verify a submitted code.
    ///
    /// Failure ordering matters: an active lockout rejects even the right
    /// code, then expiry, then the code comparison with attempt counting.
    pub async fn verify(&self, recipient_id: RecipientId, code: &str) -> Result<()> {
        let now = Utc::now();
        let mut state = self
            .store
            .get(recipient_id)
            .await?
            .ok_or(EngineError::OtpExpired)?;

        if let Some(locked_until) = state.locked_until {
            if now < locked_until {
                return Err(EngineError::OtpLocked { locked_until });
            }
            // Lockout elapsed: the stale code is gone for good, a new one
            // must be requested.
            self.store.clear(recipient_id).await?;
            return Err(EngineError::OtpExpired);
        }

        if now > state.expires_at {
            self.store.clear(recipient_id).await?;
            return Err(EngineError::OtpExpired);
        }

        if hash_code(code) != state.code_hash {
            state.attempts += 1;
            if state.attempts >= self.config.max_attempts {
                let locked_until = now + self.config.lockout;
                state.locked_until = Some(locked_until);
                self.store.put(recipient_id, state).await?;
                return Err(EngineError::OtpLocked { locked_until });
            }
            let attempts_remaining = self.config.max_attempts - state.attempts;
            self.store.put(recipient_id, state).await?;
            return Err(EngineError::OtpInvalid { attempts_remaining });
        }

        self.store.clear(recipient_id).await?;
        Ok(())
    }
}

fn random_code(digits: u32) -> String {
    let mut rng = rand::thread_rng();
    (0..digits)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}
