use axum::{routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use voucher_gateway::api::{self, ApiServices};
use voucher_gateway::auth::step_up::InMemoryTotpRepository;
use voucher_gateway::auth::{StepUpAuthGate, TotpRepository};
use voucher_gateway::config::AppConfig;
use voucher_gateway::health::{HealthChecker, HealthState, HealthStatus};
use voucher_gateway::logging::init_tracing;
use voucher_gateway::middleware::logging::{request_logging_middleware, UuidRequestId};
use voucher_gateway::orders::repository::{InMemoryOrderRepository, OrderRepository};
use voucher_gateway::orders::state_machine::OrderStateMachine;
use voucher_gateway::payments::factory::ProviderRegistry;
use voucher_gateway::services::catalog::{
    Catalog, CustomerProfile, InMemoryCatalog, ProductSnapshot,
};
use voucher_gateway::services::checkout::CheckoutService;
use voucher_gateway::services::notification::LoggingNotificationSender;
use voucher_gateway::services::webhook_ingestor::WebhookIngestor;
use voucher_gateway::tickets::repository::{
    InMemoryTicketValidationRepository, TicketValidationRepository,
};
use voucher_gateway::tickets::service::TicketService;
use voucher_gateway::workers::ticket_sweeper::{TicketSweeperConfig, TicketSweeperWorker};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

/// Storage behind the services: PostgreSQL, or in-memory with
/// `SKIP_EXTERNALS=true`.
struct Stores {
    orders: Arc<dyn OrderRepository>,
    validations: Arc<dyn TicketValidationRepository>,
    catalog: Arc<dyn Catalog>,
    totp: Arc<dyn TotpRepository>,
    #[cfg(feature = "database")]
    pool: Option<sqlx::PgPool>,
}

async fn in_memory_stores() -> Stores {
    let catalog = Arc::new(InMemoryCatalog::new());
    seed_demo_catalog(&catalog).await;
    Stores {
        orders: Arc::new(InMemoryOrderRepository::new()),
        validations: Arc::new(InMemoryTicketValidationRepository::new()),
        catalog,
        totp: Arc::new(InMemoryTotpRepository::new()),
        #[cfg(feature = "database")]
        pool: None,
    }
}

/// One merchant, product and customer so the flow can be tried locally.
async fn seed_demo_catalog(catalog: &InMemoryCatalog) {
    let merchant_id = Uuid::new_v4();
    let product_id = Uuid::new_v4();
    let customer_id = Uuid::new_v4();
    catalog
        .add_product(ProductSnapshot {
            id: product_id,
            merchant_id,
            name: "Demo voucher".to_string(),
            unit_price: 500,
            ticket_expiry: None,
            is_active: true,
        })
        .await;
    catalog
        .add_customer(CustomerProfile {
            id: customer_id,
            email: Some("demo@example.com".to_string()),
            name: Some("Demo customer".to_string()),
        })
        .await;
    info!(
        merchant_id = %merchant_id,
        product_id = %product_id,
        customer_id = %customer_id,
        "🧪 Seeded demo catalog"
    );
}

#[cfg(feature = "database")]
async fn postgres_stores(config: &voucher_gateway::config::DatabaseConfig) -> anyhow::Result<Stores> {
    use voucher_gateway::database::{
        catalog_repository::PgCatalog, init_pool_from_config, order_repository::PgOrderRepository,
        run_migrations, ticket_validation_repository::PgTicketValidationRepository,
        totp_repository::PgTotpRepository,
    };

    info!("📊 Initializing database connection pool...");
    let pool = init_pool_from_config(config).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        e
    })?;
    info!(
        max_connections = pool.options().get_max_connections(),
        "✅ Database connection pool initialized"
    );

    if config.run_migrations {
        run_migrations(&pool).await?;
    }

    Ok(Stores {
        orders: Arc::new(PgOrderRepository::new(pool.clone())),
        validations: Arc::new(PgTicketValidationRepository::new(pool.clone())),
        catalog: Arc::new(PgCatalog::new(pool.clone())),
        totp: Arc::new(PgTotpRepository::new(pool.clone())),
        pool: Some(pool),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting voucher gateway"
    );
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Server configuration loaded"
    );

    let stores = match &config.database {
        #[cfg(feature = "database")]
        Some(database) => postgres_stores(database).await?,
        _ => {
            info!("⏭️  Using in-memory stores (SKIP_EXTERNALS=true)");
            in_memory_stores().await
        }
    };

    info!("💳 Loading payment providers...");
    let providers = ProviderRegistry::from_env().map_err(|e| {
        error!("❌ Failed to initialize payment providers: {}", e);
        e
    })?;

    let state_machine = Arc::new(OrderStateMachine::new(
        stores.orders.clone(),
        stores.catalog.clone(),
        config.tickets.validity(),
    ));
    let tickets = Arc::new(TicketService::new(
        stores.orders.clone(),
        stores.validations.clone(),
        stores.catalog.clone(),
        Arc::new(LoggingNotificationSender::new()),
        config.tickets.reminder_window(),
    ));
    let services = ApiServices {
        checkout: Arc::new(CheckoutService::new(
            stores.orders.clone(),
            stores.catalog.clone(),
            providers.clone(),
        )),
        ingestor: Arc::new(WebhookIngestor::new(
            providers.clone(),
            state_machine.clone(),
            tickets.clone(),
        )),
        state_machine,
        tickets: tickets.clone(),
        step_up: Arc::new(StepUpAuthGate::new(
            stores.totp.clone(),
            config.totp.issuer.clone(),
            config.totp.trust_window(),
        )),
    };

    info!("🏥 Initializing health checker...");
    #[cfg(feature = "database")]
    let health_checker = HealthChecker::new(stores.pool.clone(), providers.clone());
    #[cfg(not(feature = "database"))]
    let health_checker = HealthChecker::new(providers.clone());

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let sweeper_handle = if config.tickets.sweep_enabled {
        let sweeper_config = TicketSweeperConfig::from(&config.tickets);
        info!(
            interval_secs = sweeper_config.interval.as_secs(),
            "Starting ticket sweeper worker"
        );
        let worker = TicketSweeperWorker::new(tickets, sweeper_config);
        Some(tokio::spawn(worker.run(worker_shutdown_rx)))
    } else {
        info!("Ticket sweeper worker disabled (TICKET_SWEEP_ENABLED=false)");
        None
    };

    info!("🛣️  Setting up application routes...");
    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .with_state(AppState { health_checker })
        .merge(api::router(&services))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║               🎫 VOUCHER GATEWAY IS RUNNING 🎫               ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Address: http://{:<44}║", addr);
    println!("║  Providers: {:<49}║", format!("{:?}", providers.list_available_providers()));
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  POST /api/checkout              - Create order and pay     ║");
    println!("║  POST /payments/newebpay/notify  - Gateway notification     ║");
    println!("║  GET  /payments/linepay/confirm  - LINE Pay confirmation    ║");
    println!("║  POST /api/tickets/redeem        - Redeem a voucher         ║");
    println!("║  GET  /health                    - Health check             ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
    .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = sweeper_handle {
        if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for ticket sweeper shutdown");
        }
    }

    info!("👋 Server shutdown complete");
    Ok(())
}

#[derive(Clone)]
struct AppState {
    health_checker: HealthChecker,
}

async fn root() -> &'static str {
    "Voucher gateway"
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    let health_status = state.health_checker.check_health().await;

    if health_status.status == HealthState::Unhealthy {
        error!("❌ Health check failed - service unhealthy");
        Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        Ok(Json(health_status))
    }
}

async fn liveness() -> &'static str {
    "OK"
}
