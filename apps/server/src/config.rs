use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::Context;
use stallplass_reconcile::{PollingConfig, DEFAULT_RETENTION_HOURS};
use stallplass_realtime::DistributorConfig;
use stallplass_wallet::WalletClientConfig;

pub struct Config {
    pub listen_addr: SocketAddr,
    pub cors_allow: Vec<String>,
    pub request_timeout: Duration,
    pub wallet: WalletClientConfig,
    pub polling: PollingConfig,
    pub distributors: DistributorConfig,
    pub session_retention_hours: u32,
    pub cleanup_interval: Duration,
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            cors_allow: vec!["*".to_string()],
            request_timeout: Duration::from_millis(30_000),
            wallet: WalletClientConfig::default(),
            polling: PollingConfig::default(),
            distributors: DistributorConfig::default(),
            session_retention_hours: DEFAULT_RETENTION_HOURS,
            cleanup_interval: Duration::from_secs(3600),
            log_format: "text".to_string(),
        }
    }
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parses `key` when set. A value that does not parse is an error rather
/// than a silent fallback.
fn parsed<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid {key}: {raw}"))
        })
        .transpose()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Some(addr) = parsed("STALLPLASS_LISTEN_ADDR")? {
            config.listen_addr = addr;
        }
        if let Some(origins) = var("STALLPLASS_CORS_ALLOW_ORIGINS") {
            config.cors_allow = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(ms) = parsed::<u64>("STALLPLASS_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }

        if let Some(url) = var("STALLPLASS_WALLET_BASE_URL") {
            config.wallet.base_url = url;
        }
        if let Some(id) = var("STALLPLASS_WALLET_CLIENT_ID") {
            config.wallet.client_id = id;
        }
        if let Some(secret) = var("STALLPLASS_WALLET_CLIENT_SECRET") {
            config.wallet.client_secret = secret;
        }
        if let Some(key) = var("STALLPLASS_WALLET_SUBSCRIPTION_KEY") {
            config.wallet.subscription_key = key;
        }
        if let Some(serial) = var("STALLPLASS_WALLET_MERCHANT_SERIAL") {
            config.wallet.merchant_serial_number = serial;
        }

        if let Some(ms) = parsed("STALLPLASS_POLL_INTERVAL_MS")? {
            config.polling.interval_ms = ms;
        }
        if let Some(attempts) = parsed("STALLPLASS_POLL_MAX_ATTEMPTS")? {
            config.polling.max_attempts = attempts;
        }
        config
            .polling
            .validate()
            .context("Invalid polling configuration")?;

        if let Some(hours) = parsed("STALLPLASS_SESSION_RETENTION_HOURS")? {
            config.session_retention_hours = hours;
        }
        if let Some(secs) = parsed::<u64>("STALLPLASS_CLEANUP_INTERVAL_SECS")? {
            config.cleanup_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(days) = parsed("STALLPLASS_ENDING_SOON_DAYS")? {
            config.distributors.ending_soon_days = days;
        }
        if let Some(format) = var("STALLPLASS_LOG_FORMAT") {
            config.log_format = format;
        }

        Ok(config)
    }
}
