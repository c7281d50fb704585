use chrono_tz::Tz;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub telegram_bot_token: String,
    pub database_url: String,

    /// Telegram user ID of the administrator; always passes the access gate
    /// and may provision new users with /user.
    pub admin_id: i64,

    /// IANA zone applied to users who have not picked one yet.
    pub default_timezone: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let default_timezone =
            std::env::var("DEFAULT_TIMEZONE").unwrap_or_else(|_| "Europe/Warsaw".to_string());
        // Startup-ordering invariant: an unresolvable default zone must fail
        // here, not inside a reminder computation weeks later.
        default_timezone
            .parse::<Tz>()
            .map_err(|_| anyhow::anyhow!("DEFAULT_TIMEZONE is not a valid IANA zone: {default_timezone}"))?;

        Ok(Self {
            telegram_bot_token: std::env::var("TELEGRAM_BOT_TOKEN")?,
            database_url: std::env::var("DATABASE_URL")?,
            admin_id: std::env::var("ADMIN_ID")?.parse()?,
            default_timezone,
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_id == user_id
    }

    pub fn default_tz(&self) -> Tz {
        self.default_timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}
