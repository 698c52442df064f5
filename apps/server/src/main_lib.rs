use std::sync::Arc;

use stallplass_core::events::InMemoryChangeFeed;
use stallplass_core::memory::InMemoryMarketplace;
use stallplass_core::payments::PaymentProviderClient;
use stallplass_reconcile::{PaymentReconciliationEngine, TokioScheduler};
use stallplass_realtime::DistributorDeps;
use stallplass_wallet::WalletClient;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{config::Config, distributors::DistributorRegistry};

pub struct AppState {
    pub store: Arc<InMemoryMarketplace>,
    pub feed: Arc<InMemoryChangeFeed>,
    pub engine: PaymentReconciliationEngine,
    pub distributors: DistributorRegistry,
    pub session_retention_hours: u32,
}

pub fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    if !config.wallet.has_credentials() {
        tracing::warn!(
            "Wallet credentials are incomplete; provider calls will be rejected until they are set"
        );
    }
    let wallet = WalletClient::new(config.wallet.clone())?;
    tracing::info!("Wallet provider at {}", wallet.config().base_url);
    build_state_with_provider(config, Arc::new(wallet)).await
}

/// Wires the store, feed, engine and distributors around `provider`.
pub async fn build_state_with_provider(
    config: &Config,
    provider: Arc<dyn PaymentProviderClient>,
) -> anyhow::Result<Arc<AppState>> {
    let feed = Arc::new(InMemoryChangeFeed::new());
    let store = Arc::new(InMemoryMarketplace::with_change_feed(feed.clone()));

    config.polling.validate()?;
    let engine = PaymentReconciliationEngine::with_config(
        provider,
        store.clone(),
        feed.clone(),
        Arc::new(TokioScheduler::new()),
        config.polling.clone(),
    );

    let deps = DistributorDeps {
        feed: feed.clone(),
        rentals: store.clone(),
        conversations: store.clone(),
        users: store.clone(),
    };
    let distributors = DistributorRegistry::new(deps, config.distributors.clone());

    Ok(Arc::new(AppState {
        store,
        feed,
        engine,
        distributors,
        session_retention_hours: config.session_retention_hours,
    }))
}
