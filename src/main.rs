//! HITL Approval Gateway service binary.
//!
//! Startup order matters: configuration, storage, recovery, workers, then
//! the listener. The gateway refuses to serve traffic before it has verified
//! and re-announced every surviving pending approval.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hitl_gateway::api::{self, ApiState};
use hitl_gateway::auth::JwtHandler;
use hitl_gateway::cascade::LockCascadeHandler;
use hitl_gateway::config::Config;
use hitl_gateway::expiry::ExpiryWorker;
use hitl_gateway::gateway::HitlGateway;
use hitl_gateway::guardian::{GuardianMonitor, GuardianPort, HttpGuardian, StaticGuardian};
use hitl_gateway::market_data::{HttpMarketData, MarketDataSource, UnavailableMarketData};
use hitl_gateway::metrics::HitlMetrics;
use hitl_gateway::middleware::{DecisionRateLimiter, RateLimitConfig};
use hitl_gateway::notify::{EventBus, LogNotifier};
use hitl_gateway::store::ApprovalStore;

#[derive(Parser, Debug)]
#[command(name = "hitl-gateway", about = "Human-in-the-loop trade approval gateway")]
struct Args {
    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,
    /// SQLite database path (overrides DATABASE_PATH)
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args = Args::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // SEC-040: a gateway with incomplete configuration must not run.
            error!(error = %e, "startup refused (SEC-040)");
            std::process::exit(1);
        }
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }

    info!(
        hitl_enabled = config.hitl_enabled,
        timeout_seconds = config.timeout_seconds,
        database = %config.database_path,
        "🛡️ HITL approval gateway starting"
    );
    if !config.hitl_enabled {
        warn!("HITL_ENABLED=false: signals will be auto-accepted (testing mode only)");
    }

    let store = ApprovalStore::open(&config.database_path).context("open approval store")?;

    let guardian: Arc<dyn GuardianPort> = match &config.guardian_url {
        Some(url) => Arc::new(
            HttpGuardian::new(url, config.outbound_timeout).context("build guardian client")?,
        ),
        None => {
            warn!("GUARDIAN_URL not set: treating guardian as locked (fail-closed)");
            Arc::new(StaticGuardian::locked("guardian not configured"))
        }
    };

    let market_data: Arc<dyn MarketDataSource> = match &config.market_data_url {
        Some(url) => Arc::new(
            HttpMarketData::new(url, config.outbound_timeout)
                .context("build market data client")?,
        ),
        None => {
            warn!("MARKET_DATA_URL not set: decisions will fail closed (SEC-050)");
            Arc::new(UnavailableMarketData)
        }
    };

    let metrics = Arc::new(HitlMetrics::new());
    let events = EventBus::default();
    let jwt = Arc::new(JwtHandler::new(config.jwt_secret.clone()));

    let gateway = Arc::new(HitlGateway::new(
        config.clone(),
        store,
        guardian.clone(),
        market_data,
        Arc::new(LogNotifier),
        events,
        metrics,
    ));

    // Recovery runs to completion before the listener binds.
    let report = gateway
        .recover_on_startup()
        .await
        .context("startup recovery")?;
    info!(
        reannounced = report.reannounced,
        expired = report.expired,
        quarantined = report.quarantined,
        "recovery finished, accepting traffic"
    );

    let monitor = Arc::new(GuardianMonitor::new(
        guardian,
        config.guardian_poll_interval,
    ));
    let cascade = LockCascadeHandler::new(gateway.clone(), monitor.subscribe());
    tokio::spawn(cascade.run());
    tokio::spawn(monitor.clone().run());

    let worker = ExpiryWorker::new(gateway.clone(), config.expiry_interval);
    tokio::spawn(worker.run());

    let limiter = DecisionRateLimiter::new(RateLimitConfig::default());
    let limiter_cleanup = limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            ticker.tick().await;
            limiter_cleanup.cleanup();
        }
    });

    let app = api::router(ApiState {
        gateway,
        jwt,
        limiter,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    info!(addr = %addr, "🚦 listening");
    let listener = TcpListener::bind(&addr).await.context("bind listener")?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hitl_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
