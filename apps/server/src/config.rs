use anyhow::Context;

/// Default rolling horizon for proactive slot generation (days).
const DEFAULT_HORIZON_DAYS: i64 = 60;
/// Default interval between horizon maintenance runs (seconds).
const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 24 * 3600;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Telegram bot token; used to validate initData and to send notifications.
    pub bot_token: String,
    /// Telegram id of the platform admin who approves salons.
    pub admin_tg_id: i64,
    pub host: String,
    pub port: u16,
    pub webapp_url: Option<String>,
    pub horizon_days: i64,
    pub maintenance_interval_secs: u64,
}

impl Config {
    /// Read configuration from the environment (after `dotenvy` has run).
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bot_token = get("BOT_TOKEN").context("BOT_TOKEN must be set")?;
        let admin_tg_id = get("ADMIN_TG_ID")
            .context("ADMIN_TG_ID must be set")?
            .parse()
            .context("ADMIN_TG_ID must be a number")?;

        let port = match get("PORT") {
            Some(p) => p.parse().context("PORT must be a port number")?,
            None => 3000,
        };
        let horizon_days = match get("HORIZON_DAYS") {
            Some(d) => d.parse().context("HORIZON_DAYS must be a number")?,
            None => DEFAULT_HORIZON_DAYS,
        };
        if horizon_days < 1 {
            anyhow::bail!("HORIZON_DAYS must be at least 1");
        }
        let maintenance_interval_secs = match get("MAINTENANCE_INTERVAL_SECS") {
            Some(s) => s
                .parse()
                .context("MAINTENANCE_INTERVAL_SECS must be a number")?,
            None => DEFAULT_MAINTENANCE_INTERVAL_SECS,
        };
        if maintenance_interval_secs == 0 {
            anyhow::bail!("MAINTENANCE_INTERVAL_SECS must be at least 1");
        }

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite:salons.db?mode=rwc".into()),
            bot_token,
            admin_tg_id,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            webapp_url: get("WEBAPP_URL").filter(|u| !u.is_empty()),
            horizon_days,
            maintenance_interval_secs,
        })
    }
}
