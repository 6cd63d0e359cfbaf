use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use updown_backend::api::{self, AppState};
use updown_backend::auth::AuthService;
use updown_backend::bet::BetService;
use updown_backend::config::Config;
use updown_backend::market::MarketService;
use updown_backend::mm::MmService;
use updown_backend::price::PriceOracle;
use updown_backend::resolution::ResolutionService;
use updown_backend::scheduler::Scheduler;
use updown_backend::store::Ledger;
use updown_backend::wallet::WalletService;
use updown_backend::ws::Hub;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "updown_backend=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = Arc::new(Config::from_env().context("load config")?);
    cfg.validate().context("validate config")?;
    info!(env = %cfg.server.env, "configuration loaded");

    let ledger = Ledger::open(&cfg.db.path).context("open ledger")?;
    info!(path = %cfg.db.path, "ledger ready");

    // Services. The capability seams (rebalancer, refunder, broadcaster,
    // resolved sink) are injected after construction to break the cycles
    // between the bet, market, resolution and MM services.
    let oracle = Arc::new(PriceOracle::new(cfg.price.clone())?);
    let hub = Arc::new(Hub::new());
    let auth = Arc::new(AuthService::new(ledger.clone(), cfg.clone()));
    let wallets = Arc::new(WalletService::new(ledger.clone(), cfg.clone()));
    let markets = Arc::new(MarketService::new(ledger.clone(), oracle.clone(), cfg.clone()));
    let bets = Arc::new(BetService::new(ledger.clone(), cfg.clone()));
    let resolution = Arc::new(ResolutionService::new(ledger.clone(), oracle.clone()));
    let mm = Arc::new(MmService::new(ledger.clone(), cfg.clone()).await?);

    markets.set_refunder(resolution.clone());
    resolution.set_sink(hub.clone());
    bets.set_rebalancer(mm.clone());
    bets.set_broadcaster(hub.clone());

    // Background loops share one shutdown signal; flipping it lets each
    // loop exit on its next tick.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::new(Scheduler::new(
        markets.clone(),
        resolution.clone(),
        oracle.clone(),
        hub.clone(),
        shutdown_rx,
    ));
    scheduler.start();

    let state = AppState {
        cfg: cfg.clone(),
        ledger,
        auth,
        bets,
        markets,
        wallets,
        mm,
        resolution,
        oracle,
        hub,
    };

    let public = api::router(state.clone());
    let backoffice = api::backoffice_router(state);

    let public_addr = format!("0.0.0.0:{}", cfg.server.port);
    let backoffice_addr = format!("0.0.0.0:{}", cfg.server.backoffice_port);

    let public_listener = TcpListener::bind(&public_addr)
        .await
        .with_context(|| format!("bind {public_addr}"))?;
    let backoffice_listener = TcpListener::bind(&backoffice_addr)
        .await
        .with_context(|| format!("bind {backoffice_addr}"))?;
    info!(public = %public_addr, backoffice = %backoffice_addr, "listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(backoffice_listener, backoffice).await {
            tracing::error!(error = %e, "backoffice server exited");
        }
    });

    let serve = axum::serve(public_listener, public)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await;

    let _ = shutdown_tx.send(true);
    serve.context("public server exited")
}
