use serde::Serialize;

/// Providers surfaced to end users by default. The allowlist is
/// configuration, not logic: operators add or remove providers without
/// touching selection code.
pub const PROVIDER_MID_MARKET: &str = "mid-market";
pub const PROVIDER_BOT_REFERENCE: &str = "bot-reference";

/// Display name for the admin-set house rate.
pub const DEFAULT_HOUSE_PROVIDER: &str = "house-rate";

/// Inclusive band a CNY→THB rate must fall in to be accepted from a human.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateBand {
    pub min: f64,
    pub max: f64,
}

impl RateBand {
    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    /// Seconds between quote refreshes.
    pub refresh_interval_secs: u64,
    /// Seconds between alert evaluation cycles.
    pub alert_interval_secs: u64,
    /// Admin user ids configured alongside the persisted admin registry.
    pub admin_user_ids: Vec<String>,
    /// Providers surfaced by display and conversion endpoints.
    pub public_providers: Vec<String>,
    /// Display name for the house rate.
    pub house_provider: String,
    /// Added to a rounded buying rate when no selling rate is given.
    pub default_spread: f64,
    /// Plausibility band for admin-set rates and alert targets.
    pub rate_band: RateBand,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./bahtbot.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let refresh_interval_secs = std::env::var("RATE_REFRESH_INTERVAL_SECS")
            .unwrap_or_else(|_| "1800".to_string())
            .parse()
            .unwrap_or(1800);

        let alert_interval_secs = std::env::var("ALERT_CHECK_INTERVAL_SECS")
            .unwrap_or_else(|_| "1800".to_string())
            .parse()
            .unwrap_or(1800);

        let admin_user_ids = std::env::var("ADMIN_USER_IDS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let public_providers = std::env::var("PUBLIC_PROVIDERS")
            .unwrap_or_else(|_| format!("{},{}", PROVIDER_MID_MARKET, PROVIDER_BOT_REFERENCE))
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let house_provider = std::env::var("HOUSE_PROVIDER")
            .unwrap_or_else(|_| DEFAULT_HOUSE_PROVIDER.to_string());

        let default_spread = std::env::var("DEFAULT_SPREAD")
            .unwrap_or_else(|_| "0.20".to_string())
            .parse()
            .unwrap_or(0.20);

        let rate_band = RateBand {
            min: std::env::var("RATE_BAND_MIN")
                .unwrap_or_else(|_| "3.0".to_string())
                .parse()
                .unwrap_or(3.0),
            max: std::env::var("RATE_BAND_MAX")
                .unwrap_or_else(|_| "6.0".to_string())
                .parse()
                .unwrap_or(6.0),
        };

        Ok(Self {
            database_path,
            port,
            refresh_interval_secs,
            alert_interval_secs,
            admin_user_ids,
            public_providers,
            house_provider,
            default_spread,
            rate_band,
        })
    }
}
