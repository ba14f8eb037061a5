//! PostgreSQL template store.
//!
//! Templates are read far more often than written; the whole template is
//! stored as JSONB alongside the scalar columns used for lookup.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::FromRow;

use crate::domain::{CompanyId, Template, TemplateId};
use crate::infra::{EngineError, Result, TemplateStore};

/// PostgreSQL-backed template store.
pub struct PgTemplateStore {
    pool: PgPool,
}

impl PgTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct TemplateRow {
    body: serde_json::Value,
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
    async fn insert(&self, template: &Template) -> Result<()> {
        let body = serde_json::to_value(template)
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO templates (id, company_id, name, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
                SET name = EXCLUDED.name,
                    body = EXCLUDED.body,
                    updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(template.id.0)
        .bind(template.company_id.0)
        .bind(&template.name)
        .bind(body)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, company_id: CompanyId, id: TemplateId) -> Result<Option<Template>> {
        let row = sqlx::query_as::<_, TemplateRow>(
            "SELECT body FROM templates WHERE id = $1 AND company_id = $2",
        )
        .bind(id.0)
        .bind(company_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            serde_json::from_value(r.body)
                .map_err(|e| EngineError::Internal(format!("corrupt template column: {e}")))
        })
        .transpose()
    }
}

/// PostgreSQL-backed short-link store.
pub struct PgShortLinkStore {
    pool: PgPool,
}

impl PgShortLinkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl crate::infra::ShortLinkStore for PgShortLinkStore {
    async fn put(&self, code: &str, url: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO short_links (code, url, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (code) DO UPDATE SET url = EXCLUDED.url
            "#,
        )
        .bind(code)
        .bind(url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn resolve(&self, code: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT url FROM short_links WHERE code = $1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(url,)| url))
    }
}
