//! Operational CLI for esign-engine.
//!
//! Covers the maintenance jobs that are normally driven by the background
//! workers, so they can also be run from cron or by hand.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;

use esign_engine::infra::{
    HttpCallbackSender, NullGeoLocator, PgAuditLog, PgDocumentStore, PgOtpStore,
    PgShortLinkStore, PgTemplateStore, UnconfiguredPdfGenerator,
};
use esign_engine::notify::{LogNotificationProvider, NotificationService};
use esign_engine::otp::{OtpConfig, OtpService};
use esign_engine::token::TokenService;
use esign_engine::workflow::{DocumentWorkflow, WorkflowConfig, WorkflowDeps};

fn print_help() {
    eprintln!(
        "\
esign-engine-admin

USAGE:
  admin <command> [options]

COMMANDS:
  migrate             Run database migrations
  sweep-expired       Transition overdue documents to expired
  deliver-callbacks   Deliver outstanding webhook callbacks

COMMON OPTIONS:
  --database-url <postgres_url>    (defaults to env DATABASE_URL)
  --limit <n>                      batch size (default 100)
"
    );
}

fn require_database_url(explicit: Option<String>) -> anyhow::Result<String> {
    explicit
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .ok_or_else(|| anyhow::anyhow!("set --database-url or DATABASE_URL"))
}

struct CommonArgs {
    database_url: Option<String>,
    limit: i64,
}

fn parse_common(args: &mut VecDeque<String>) -> anyhow::Result<Option<CommonArgs>> {
    let mut database_url: Option<String> = None;
    let mut limit: i64 = 100;

    while let Some(arg) = args.pop_front() {
        match arg.as_str() {
            "--database-url" => {
                database_url = Some(
                    args.pop_front()
                        .ok_or_else(|| anyhow::anyhow!("missing value for --database-url"))?,
                );
            }
            "--limit" => {
                let raw = args
                    .pop_front()
                    .ok_or_else(|| anyhow::anyhow!("missing value for --limit"))?;
                limit = raw.parse()?;
            }
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            other => anyhow::bail!("unexpected argument: {other}"),
        }
    }

    Ok(Some(CommonArgs {
        database_url,
        limit,
    }))
}

async fn build_engine(pool: sqlx::PgPool) -> anyhow::Result<Arc<DocumentWorkflow>> {
    // The maintenance jobs never issue signing links; a placeholder secret
    // keeps the constructor honest when TOKEN_SECRET is absent.
    let token_secret =
        std::env::var("TOKEN_SECRET").unwrap_or_else(|_| "admin-cli-no-issuance".to_string());
    let public_base_url =
        std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());

    Ok(Arc::new(DocumentWorkflow::new(
        WorkflowDeps {
            documents: Arc::new(PgDocumentStore::new(pool.clone())),
            templates: Arc::new(PgTemplateStore::new(pool.clone())),
            audit: Arc::new(PgAuditLog::new(pool.clone())),
            short_links: Arc::new(PgShortLinkStore::new(pool.clone())),
            tokens: Arc::new(TokenService::new(token_secret.as_bytes(), "esign-engine")),
            otp: Arc::new(OtpService::new(
                Arc::new(PgOtpStore::new(pool)),
                OtpConfig::default(),
            )),
            notifications: Arc::new(NotificationService::new(Arc::new(LogNotificationProvider))),
            pdf: Arc::new(UnconfiguredPdfGenerator),
            callbacks: Arc::new(HttpCallbackSender::new()),
            geo: Arc::new(NullGeoLocator),
        },
        WorkflowConfig { public_base_url },
    )))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    let Some(common) = parse_common(&mut args)? else {
        return Ok(());
    };
    let database_url = require_database_url(common.database_url)?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    match command.as_str() {
        "migrate" => {
            esign_engine::migrations::run_postgres(&pool).await?;
            println!("ok: migrations applied");
        }
        "sweep-expired" => {
            esign_engine::migrations::run_postgres(&pool).await?;
            let engine = build_engine(pool).await?;
            let expired = engine.expire_documents(Utc::now(), common.limit).await?;
            println!("ok: {expired} documents expired");
        }
        "deliver-callbacks" => {
            esign_engine::migrations::run_postgres(&pool).await?;
            let engine = build_engine(pool).await?;
            let delivered = engine.deliver_pending_callbacks(common.limit).await?;
            println!("ok: {delivered} callbacks delivered");
        }
        other => {
            eprintln!("unknown command: {other}");
            print_help();
            std::process::exit(2);
        }
    }

    Ok(())
}
