use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::FixedOffset;
use dotenvy::dotenv;

use crate::engine::EngineSettings;
use crate::matcher::SourceMatching;
use crate::models::ForwardMode;
use crate::schedule::parse_utc_offset;

#[derive(Clone, Debug)]
pub struct Config {
    pub bot_token: String,
    pub database_url: String,
    pub admin_id: Option<i64>,
    pub dedup_ttl: Duration,
    pub snapshot_refresh: Duration,
    pub utc_offset: FixedOffset,
    /// Overrides the stored default mode for new rules when set.
    pub default_mode: Option<ForwardMode>,
    pub legacy_source_match: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let bot_token = env::var("TELOXIDE_TOKEN").context("TELOXIDE_TOKEN must be set")?;
        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:relay.db?mode=rwc".to_string());

        let admin_id = match env::var("ADMIN_ID") {
            Ok(v) if !v.trim().is_empty() => {
                Some(v.trim().parse().with_context(|| format!("ADMIN_ID is not a number: {:?}", v))?)
            }
            _ => None,
        };

        let dedup_ttl = Duration::from_secs(parse_var("DEDUP_TTL_SECS", 3600)?);
        let snapshot_refresh = Duration::from_secs(parse_var("SNAPSHOT_REFRESH_SECS", 60)?.max(1));

        let utc_offset = parse_utc_offset(&env::var("SCHEDULE_UTC_OFFSET").unwrap_or_default())
            .context("SCHEDULE_UTC_OFFSET")?;

        let default_mode = match env::var("DEFAULT_MODE") {
            Ok(v) => Some(
                ForwardMode::parse(&v).ok_or_else(|| anyhow!("DEFAULT_MODE must be forward or copy, got {:?}", v))?,
            ),
            Err(_) => None,
        };

        let legacy_source_match = match env::var("LEGACY_SOURCE_MATCH") {
            Ok(v) => parse_bool(&v).ok_or_else(|| anyhow!("LEGACY_SOURCE_MATCH must be true or false, got {:?}", v))?,
            Err(_) => true,
        };

        Ok(Self {
            bot_token,
            database_url,
            admin_id,
            dedup_ttl,
            snapshot_refresh,
            utc_offset,
            default_mode,
            legacy_source_match,
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            offset: self.utc_offset,
            source_matching: SourceMatching::from_legacy_flag(self.legacy_source_match),
            dedup_ttl: self.dedup_ttl,
            fallback_admin: self.admin_id,
        }
    }
}

fn parse_var(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{} must be a non-negative integer, got {:?}", name, v)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn bools_accept_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
