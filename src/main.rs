use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

use valr_connect::config::{ConnectorConfig, Credentials};
use valr_connect::connector::Connector;
use valr_connect::core::Symbol;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,valr_connect=debug"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();

    let config = ConnectorConfig::load_default();
    let credentials = Credentials::from_env()?;
    let instruments: Vec<Symbol> = config.instruments.iter().map(|s| Symbol::new(s.as_str())).collect();

    tracing::info!("📡 VALR connectivity core starting ({} instrument(s))", instruments.len());
    let connector = Connector::start(config, credentials).await?;

    // Periodic state dump until interrupted. The strategy layer would sit
    // here instead, driving submit/cancel off its own tick.
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let conn = connector.connectivity();
                tracing::info!("connectivity: market={:?} account={:?}", conn.market, conn.account);
                for symbol in &instruments {
                    if let Some(view) = connector.book(symbol, 1) {
                        tracing::info!(
                            "{}: bid {:?} ask {:?} (seq {})",
                            symbol,
                            view.bids.first().map(|l| l.price),
                            view.asks.first().map(|l| l.price),
                            view.sequence
                        );
                    }
                }
                let open = connector.open_orders();
                if !open.is_empty() {
                    tracing::info!("{} open order(s)", open.len());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                break;
            }
        }
    }

    Ok(())
}
