use std::{env, time::Duration};

use chrono::Duration as ChronoDuration;

use crate::{domain::UserId, errors::Error, Result};

/// Defaults applied to offers registered with `/register`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OfferDefaults {
    pub price: i64,
    pub duration_days: u32,
    pub max_text_len: usize,
    pub max_photos: usize,
}

impl Default for OfferDefaults {
    fn default() -> Self {
        Self {
            price: 50_000,
            duration_days: 7,
            max_text_len: 1000,
            max_photos: 5,
        }
    }
}

/// Typed configuration, read from the process environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials
    pub bot_token: String,
    pub payment_provider_token: Option<String>,
    pub database_url: Option<String>,

    // Operators
    pub admin_user_ids: Vec<i64>,
    pub log_channel_id: Option<i64>,

    // Payments
    pub currency: String,
    pub offer_defaults: OfferDefaults,
    pub test_mode: bool,
    pub payment_window: ChronoDuration,

    // Timing
    pub media_group_timeout: Duration,
    pub expiry_sweep_interval: Duration,
    pub allowlist_refresh: Duration,
    pub call_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            payment_provider_token: None,
            database_url: None,
            admin_user_ids: Vec::new(),
            log_channel_id: None,
            currency: "RUB".to_string(),
            offer_defaults: OfferDefaults::default(),
            test_mode: false,
            payment_window: ChronoDuration::hours(24),
            media_group_timeout: Duration::from_millis(1500),
            expiry_sweep_interval: Duration::from_secs(300),
            allowlist_refresh: Duration::from_secs(3600),
            call_timeout: Duration::from_millis(10_000),
        }
    }
}

impl Config {
    /// Load `.env` (existing variables win) and read the environment.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Missing credentials are a `Config` error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_str = |key: &str| lookup(key).and_then(non_empty);
        let env_bool = |key: &str| env_str(key).map(|s| parse_bool(&s));
        let env_u64 = |key: &str| env_str(key).and_then(|s| s.trim().parse::<u64>().ok());
        let env_i64 = |key: &str| env_str(key).and_then(|s| s.trim().parse::<i64>().ok());

        let defaults = Config::default();

        let bot_token = env_str("BOT_TOKEN").ok_or_else(|| {
            Error::Config("BOT_TOKEN environment variable is required".to_string())
        })?;

        let test_mode = env_bool("TEST_MODE").unwrap_or(false);

        let payment_provider_token = env_str("PAYMENT_PROVIDER_TOKEN");
        if payment_provider_token.is_none() && !test_mode {
            return Err(Error::Config(
                "PAYMENT_PROVIDER_TOKEN environment variable is required".to_string(),
            ));
        }

        let database_url = env_str("DATABASE_URL");
        if database_url.is_none() && !test_mode {
            return Err(Error::Config(
                "DATABASE_URL environment variable is required".to_string(),
            ));
        }

        let offer_defaults = OfferDefaults {
            price: env_i64("DEFAULT_PRICE").unwrap_or(defaults.offer_defaults.price),
            duration_days: env_u64("DEFAULT_DURATION_DAYS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.offer_defaults.duration_days),
            max_text_len: env_u64("DEFAULT_MAX_TEXT_LENGTH")
                .map(|v| v as usize)
                .unwrap_or(defaults.offer_defaults.max_text_len),
            max_photos: env_u64("DEFAULT_MAX_PHOTOS")
                .map(|v| v as usize)
                .unwrap_or(defaults.offer_defaults.max_photos),
        };

        let payment_window = env_i64("PAYMENT_WINDOW_HOURS")
            .map(ChronoDuration::hours)
            .unwrap_or(defaults.payment_window);

        Ok(Self {
            bot_token,
            payment_provider_token,
            database_url,
            admin_user_ids: parse_csv_i64(env_str("ADMIN_USER_IDS")),
            log_channel_id: env_i64("LOG_CHANNEL_ID"),
            currency: env_str("CURRENCY").unwrap_or(defaults.currency),
            offer_defaults,
            test_mode,
            payment_window,
            media_group_timeout: env_u64("MEDIA_GROUP_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.media_group_timeout),
            expiry_sweep_interval: env_u64("EXPIRY_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.expiry_sweep_interval),
            allowlist_refresh: env_u64("ALLOWLIST_REFRESH_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.allowlist_refresh),
            call_timeout: env_u64("CALL_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.call_timeout),
        })
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admin_user_ids.contains(&user_id.0)
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
