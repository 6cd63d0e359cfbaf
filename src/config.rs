//! Application configuration loaded from environment variables.
//!
//! Call `Config::from_env()` once in `main` and share the result behind an
//! `Arc`. `validate()` rejects misconfiguration at boot instead of at the
//! first settlement.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub backoffice_port: u16,
    pub env: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Comma-separated allow-list for back-office clients; empty = allow all.
    pub backoffice_allowed_ips: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct PriceConfig {
    pub binance_url: String,
    pub bybit_url: String,
    pub okx_url: String,
    pub fetch_timeout: Duration,
    pub cache_ttl: Duration,
    // Weight percentages; must sum to exactly 100.
    pub binance_weight: u32,
    pub bybit_weight: u32,
    pub okx_weight: u32,
}

#[derive(Debug, Clone)]
pub struct MmConfig {
    pub max_exposure_per_market: Decimal,
    pub max_daily_loss: Decimal,
    pub min_reserve: Decimal,
    /// Pool imbalance ratio that triggers a top-up, e.g. 0.8.
    pub trigger_threshold: Decimal,
    pub min_mm_bet: Decimal,
}

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub min_bet: Decimal,
    pub min_withdraw: Decimal,
    pub max_daily_withdraw: Decimal,
    pub commission_rate: Decimal,
    pub cashout_fee_rate: Decimal,
    /// Credited to every new wallet at registration.
    pub signup_bonus: Decimal,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub db: DbConfig,
    pub token: TokenConfig,
    pub price: PriceConfig,
    pub mm: MmConfig,
    pub wallet: WalletConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let server = ServerConfig {
            port: env_parse("SERVER_PORT", 8080)?,
            backoffice_port: env_parse("BACKOFFICE_PORT", 8081)?,
            env: env_str("ENVIRONMENT", "development"),
            read_timeout: env_secs("SERVER_READ_TIMEOUT_SECS", 10)?,
            write_timeout: env_secs("SERVER_WRITE_TIMEOUT_SECS", 10)?,
            backoffice_allowed_ips: env_str("BACKOFFICE_ALLOWED_IPS", "")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        };

        let db = DbConfig {
            path: env_str("DATABASE_PATH", "./updown.db"),
        };

        let token = TokenConfig {
            access_secret: env_str("JWT_ACCESS_SECRET", ""),
            refresh_secret: env_str("JWT_REFRESH_SECRET", ""),
            access_ttl: env_secs("JWT_ACCESS_TTL_SECS", 15 * 60)?,
            refresh_ttl: env_secs("JWT_REFRESH_TTL_SECS", 30 * 24 * 3600)?,
        };

        let price = PriceConfig {
            binance_url: env_str("PRICE_BINANCE_URL", "https://api.binance.com"),
            bybit_url: env_str("PRICE_BYBIT_URL", "https://api.bybit.com"),
            okx_url: env_str("PRICE_OKX_URL", "https://www.okx.com"),
            fetch_timeout: env_secs("PRICE_FETCH_TIMEOUT_SECS", 2)?,
            cache_ttl: env_secs("PRICE_CACHE_TTL_SECS", 1)?,
            binance_weight: env_parse("PRICE_BINANCE_WEIGHT", 50)?,
            bybit_weight: env_parse("PRICE_BYBIT_WEIGHT", 30)?,
            okx_weight: env_parse("PRICE_OKX_WEIGHT", 20)?,
        };

        let mm = MmConfig {
            max_exposure_per_market: env_decimal("MM_MAX_EXPOSURE_PER_MARKET", "10000")?,
            max_daily_loss: env_decimal("MM_MAX_DAILY_LOSS", "50000")?,
            min_reserve: env_decimal("MM_MIN_RESERVE", "100000")?,
            trigger_threshold: env_decimal("MM_TRIGGER_THRESHOLD", "0.8")?,
            min_mm_bet: env_decimal("MM_MIN_BET", "10")?,
        };

        let wallet = WalletConfig {
            min_bet: env_decimal("WALLET_MIN_BET", "10")?,
            min_withdraw: env_decimal("WALLET_MIN_WITHDRAW", "10")?,
            max_daily_withdraw: env_decimal("WALLET_MAX_DAILY_WITHDRAW", "50000")?,
            commission_rate: env_decimal("WALLET_COMMISSION_RATE", "0.03")?,
            cashout_fee_rate: env_decimal("WALLET_CASHOUT_FEE_RATE", "0.05")?,
            signup_bonus: env_decimal("WALLET_SIGNUP_BONUS", "1000")?,
        };

        Ok(Self {
            server,
            db,
            token,
            price,
            mm,
            wallet,
        })
    }

    pub fn is_prod(&self) -> bool {
        self.server.env == "production"
    }

    pub fn validate(&self) -> Result<()> {
        if self.token.access_secret.is_empty() {
            bail!("JWT_ACCESS_SECRET must be set");
        }
        if self.token.refresh_secret.is_empty() {
            bail!("JWT_REFRESH_SECRET must be set");
        }

        let total = self.price.binance_weight + self.price.bybit_weight + self.price.okx_weight;
        if total != 100 {
            bail!(
                "price weights must sum to 100, got {} (binance={} bybit={} okx={})",
                total,
                self.price.binance_weight,
                self.price.bybit_weight,
                self.price.okx_weight
            );
        }

        if self.wallet.commission_rate <= Decimal::ZERO || self.wallet.commission_rate >= Decimal::ONE
        {
            bail!(
                "WALLET_COMMISSION_RATE must be in (0, 1), got {}",
                self.wallet.commission_rate
            );
        }
        if self.wallet.cashout_fee_rate <= Decimal::ZERO
            || self.wallet.cashout_fee_rate >= Decimal::ONE
        {
            bail!(
                "WALLET_CASHOUT_FEE_RATE must be in (0, 1), got {}",
                self.wallet.cashout_fee_rate
            );
        }
        if self.mm.trigger_threshold <= Decimal::ZERO || self.mm.trigger_threshold >= Decimal::ONE {
            bail!(
                "MM_TRIGGER_THRESHOLD must be in (0, 1), got {}",
                self.mm.trigger_threshold
            );
        }

        Ok(())
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v.parse::<T>().with_context(|| format!("{key}={v:?}")),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default_secs: u64) -> Result<Duration> {
    Ok(Duration::from_secs(env_parse(key, default_secs)?))
}

fn env_decimal(key: &str, default: &str) -> Result<Decimal> {
    let raw = env_str(key, default);
    raw.parse::<Decimal>()
        .with_context(|| format!("{key}={raw:?} is not a decimal"))
}
