use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use referral_ledger::currency::FallbackRates;
use referral_ledger::notify::TracingNotifier;
use referral_ledger::store::PgStore;
use referral_ledger::{AppState, Config, ReferralFacade, init_router};
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let store = PgStore::connect(&config.database_url).await?;
    store.ensure_schema().await?;

    let facade = ReferralFacade::new(
        Arc::new(store),
        config.base_url.clone(),
        config.rewards.clone(),
        Arc::new(FallbackRates),
        Arc::new(TracingNotifier),
    );
    let app = init_router(AppState { facade });

    let addr: SocketAddr = ([0, 0, 0, 0], config.server_port).into();
    let listener = TcpListener::bind(addr).await?;

    println!("Listening on 0.0.0.0:{}", config.server_port);
    axum::serve(listener, app).await?;
    Ok(())
}
