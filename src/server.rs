//! HTTP server bootstrap.
//!
//! Wires together configuration, the database pool, the workflow engine
//! with its collaborators, the two routers, and the background workers
//! (expiry sweep, callback delivery).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::auth::{
    ApiKeyRecord, ApiKeyValidator, AuthMiddlewareState, Authenticator, Permissions, RateLimiter,
};
use crate::infra::{
    shutdown_signal, spawn_until_shutdown, CallbackWorker, ExpiryWorker, HttpCallbackSender,
    HttpPdfGenerator, NullGeoLocator, PgAuditLog, PgDocumentStore, PgOtpStore, PgShortLinkStore,
    PgTemplateStore, ShutdownCoordinator, UnconfiguredPdfGenerator,
};
use crate::notify::{HttpNotificationProvider, LogNotificationProvider, NotificationService};
use crate::otp::{OtpConfig, OtpService};
use crate::token::TokenService;
use crate::workflow::{BulkJobStore, DocumentWorkflow, WorkflowConfig, WorkflowDeps};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Server listen address.
    pub listen_addr: SocketAddr,
    /// Maximum database connections.
    pub max_connections: u32,
    /// Base URL for signing links.
    pub public_base_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/esign_engine".to_string());

        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .expect("Invalid listen address");

        let max_connections: u32 = std::env::var("MAX_DB_CONNECTIONS")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(10);

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"));

        Self {
            database_url,
            listen_addr,
            max_connections,
            public_base_url,
        }
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DocumentWorkflow>,
    pub bulk_jobs: Arc<BulkJobStore>,
}

/// Start the HTTP server.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting esign-engine v{}", env!("CARGO_PKG_VERSION"));

    // Auth configuration
    let auth_mode = std::env::var("AUTH_MODE").unwrap_or_else(|_| "required".to_string());
    let require_auth = auth_mode != "disabled";

    let api_key_validator = Arc::new(ApiKeyValidator::new());
    let mut any_auth_configured = false;

    if let Ok(bootstrap_key) = std::env::var("BOOTSTRAP_ADMIN_API_KEY") {
        let key_hash = ApiKeyValidator::hash_key(&bootstrap_key);
        api_key_validator.register_key(ApiKeyRecord {
            key_hash,
            company_id: Uuid::nil(),
            permissions: Permissions::admin(),
            active: true,
        });
        any_auth_configured = true;
        info!("Bootstrap admin API key is configured");
    }

    if require_auth && !any_auth_configured {
        anyhow::bail!(
            "AUTH_MODE=required but no auth is configured; set BOOTSTRAP_ADMIN_API_KEY (or AUTH_MODE=disabled for local dev)"
        );
    }

    let authenticator = Arc::new(Authenticator::new(api_key_validator));

    let rate_limiter = std::env::var("RATE_LIMIT_PER_MINUTE")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .map(|rpm| Arc::new(RateLimiter::new(rpm)));

    let auth_state = AuthMiddlewareState {
        authenticator,
        require_auth,
        rate_limiter,
    };

    // Load configuration
    let config = Config::from_env();
    info!("Configuration loaded");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Public base URL: {}", config.public_base_url);
    info!("  Max connections: {}", config.max_connections);

    // Connect to PostgreSQL
    info!("Connecting to PostgreSQL...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    info!("Connected to PostgreSQL");

    let migrate_on_startup = std::env::var("DB_MIGRATE_ON_STARTUP")
        .ok()
        .map(|v| {
            !matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off"
            )
        })
        .unwrap_or(true);
    if migrate_on_startup {
        info!("Running database migrations...");
        crate::migrations::run_postgres(&pool).await?;
        info!("Database migrations applied");
    } else {
        info!("DB migrations skipped (DB_MIGRATE_ON_STARTUP=0)");
    }

    // Token signing secret
    let token_secret = std::env::var("TOKEN_SECRET")
        .map_err(|_| anyhow::anyhow!("TOKEN_SECRET must be set"))?;

    // Notification provider (HTTP relay when configured, log-only otherwise)
    let notifications = match std::env::var("NOTIFICATION_ENDPOINT") {
        Ok(endpoint) => {
            info!("Notification provider: HTTP relay at {endpoint}");
            let api_key = std::env::var("NOTIFICATION_API_KEY").ok();
            Arc::new(NotificationService::new(Arc::new(
                HttpNotificationProvider::new(endpoint, api_key),
            )))
        }
        Err(_) => {
            info!("Notification provider not configured; logging deliveries only");
            Arc::new(NotificationService::new(Arc::new(LogNotificationProvider)))
        }
    };

    // PDF rendering collaborator
    let pdf: Arc<dyn crate::infra::PdfGenerator> = match std::env::var("PDF_SERVICE_URL") {
        Ok(endpoint) => {
            info!("PDF service configured at {endpoint}");
            Arc::new(HttpPdfGenerator::new(endpoint))
        }
        Err(_) => {
            info!("PDF service not configured; signed documents stay pending completion");
            Arc::new(UnconfiguredPdfGenerator)
        }
    };

    // Build the engine
    let engine = Arc::new(DocumentWorkflow::new(
        WorkflowDeps {
            documents: Arc::new(PgDocumentStore::new(pool.clone())),
            templates: Arc::new(PgTemplateStore::new(pool.clone())),
            audit: Arc::new(PgAuditLog::new(pool.clone())),
            short_links: Arc::new(PgShortLinkStore::new(pool.clone())),
            tokens: Arc::new(TokenService::new(token_secret.as_bytes(), "esign-engine")),
            otp: Arc::new(OtpService::new(
                Arc::new(PgOtpStore::new(pool.clone())),
                OtpConfig::default(),
            )),
            notifications,
            pdf,
            callbacks: Arc::new(HttpCallbackSender::new()),
            geo: Arc::new(NullGeoLocator),
        },
        WorkflowConfig {
            public_base_url: config.public_base_url.clone(),
        },
    ));

    let state = AppState {
        engine: engine.clone(),
        bulk_jobs: Arc::new(BulkJobStore::new()),
    };

    // Background workers stop with the server.
    let coordinator = ShutdownCoordinator::new();
    spawn_until_shutdown(coordinator.signal(), ExpiryWorker::new(engine.clone()).run());
    spawn_until_shutdown(coordinator.signal(), CallbackWorker::new(engine).run());

    // Build router
    let app = build_router(auth_state)?.with_state(state);

    // Start server
    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    info!("esign-engine is ready to accept connections");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator.shutdown();
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

/// Assemble the full router: authenticated company API under `/api`, the
/// public signing surface at the root, health probes.
pub fn build_router(auth_state: AuthMiddlewareState) -> anyhow::Result<Router<AppState>> {
    let api = crate::api::company_router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        crate::auth::auth_middleware,
    ));

    let mut router = Router::new()
        .merge(crate::api::signing_router())
        .nest("/api", api)
        .route("/health", get(crate::api::handlers::health::health))
        .route("/ready", get(crate::api::handlers::health::ready))
        .layer(TraceLayer::new_for_http());

    if let Some(cors_layer) = cors_layer_from_env()? {
        router = router.layer(cors_layer);
    }

    Ok(router)
}

fn cors_layer_from_env() -> anyhow::Result<Option<CorsLayer>> {
    let origins = match std::env::var("CORS_ALLOW_ORIGINS") {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };

    let origins = origins.trim();
    if origins.is_empty() {
        return Ok(None);
    }

    let allow_origin = if origins == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin {s:?}: {e}"))
            })
            .collect::<anyhow::Result<_>>()?;
        AllowOrigin::list(origins)
    };

    Ok(Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ]),
    ))
}
