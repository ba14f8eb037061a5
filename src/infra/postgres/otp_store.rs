//! PostgreSQL OTP state store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;

use crate::domain::RecipientId;
use crate::infra::Result;
use crate::otp::{OtpState, OtpStore};

/// PostgreSQL-backed OTP store. One row per recipient, replaced on each
/// issuance.
pub struct PgOtpStore {
    pool: PgPool,
}

impl PgOtpStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct OtpRow {
    code_hash: String,
    expires_at: DateTime<Utc>,
    attempts: i32,
    locked_until: Option<DateTime<Utc>>,
    issued_at: DateTime<Utc>,
}

#[async_trait]
impl OtpStore for PgOtpStore {
    async fn get(&self, recipient_id: RecipientId) -> Result<Option<OtpState>> {
        let row = sqlx::query_as::<_, OtpRow>(
            "SELECT code_hash, expires_at, attempts, locked_until, issued_at \
             FROM otp_states WHERE recipient_id = $1",
        )
        .bind(recipient_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| OtpState {
            code_hash: r.code_hash,
            expires_at: r.expires_at,
            attempts: r.attempts as u32,
            locked_until: r.locked_until,
            issued_at: r.issued_at,
        }))
    }

    async fn put(&self, recipient_id: RecipientId, state: OtpState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO otp_states (recipient_id, code_hash, expires_at, attempts, locked_until, issued_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (recipient_id) DO UPDATE SET
                code_hash = EXCLUDED.code_hash,
                expires_at = EXCLUDED.expires_at,
                attempts = EXCLUDED.attempts,
                locked_until = EXCLUDED.locked_until,
                issued_at = EXCLUDED.issued_at
            "#,
        )
        .bind(recipient_id.0)
        .bind(&state.code_hash)
        .bind(state.expires_at)
        .bind(state.attempts as i32)
        .bind(state.locked_until)
        .bind(state.issued_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self, recipient_id: RecipientId) -> Result<()> {
        sqlx::query("DELETE FROM otp_states WHERE recipient_id = $1")
            .bind(recipient_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
