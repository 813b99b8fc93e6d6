use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use dotenvy::dotenv;

use crate::scheduler::{self, JobKind};

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub server_addr: String,
    pub api_prefix: String,

    // Logging
    pub log_dir: String,
    pub log_level: tracing::Level,

    // Scheduling
    pub scheduler_timezone: Tz,
    pub cron_daily_summary: String,
    pub cron_monthly_summary: String,
    pub cron_holiday_sync: String,
    pub cron_cache_refresh: String,
    pub shutdown_timeout_secs: u64,

    // Recomputation
    pub recompute_concurrency: usize,
    pub holiday_cache_ttl_secs: u64,
    pub holiday_cache_years: u64,

    // Rate limiting
    pub rate_trigger_per_min: u32,
}

/// Parses an optional raw value, falling back to `default` when unset.
fn parse_var<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| anyhow!("{key}={value:?} is invalid: {e}")),
    }
}

fn var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    parse_var(key, env::var(key).ok(), default)
}

fn string_var(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let timezone = string_var("SCHEDULER_TIMEZONE", "UTC");
        let config = Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            server_addr: string_var("SERVER_ADDR", "127.0.0.1:8080"),
            api_prefix: string_var("API_PREFIX", "/api"),

            log_dir: string_var("LOG_DIR", "logs"),
            log_level: var("LOG_LEVEL", tracing::Level::DEBUG)?,

            scheduler_timezone: scheduler::parse_timezone(&timezone)
                .context("SCHEDULER_TIMEZONE")?,
            cron_daily_summary: string_var(
                "CRON_DAILY_SUMMARY",
                JobKind::DailySummary.default_cron(),
            ),
            cron_monthly_summary: string_var(
                "CRON_MONTHLY_SUMMARY",
                JobKind::MonthlySummary.default_cron(),
            ),
            cron_holiday_sync: string_var("CRON_HOLIDAY_SYNC", JobKind::HolidaySync.default_cron()),
            cron_cache_refresh: string_var(
                "CRON_CACHE_REFRESH",
                JobKind::CacheRefresh.default_cron(),
            ),
            shutdown_timeout_secs: var("SHUTDOWN_TIMEOUT_SECS", 10)?,

            recompute_concurrency: var("RECOMPUTE_CONCURRENCY", 4)?,
            holiday_cache_ttl_secs: var("HOLIDAY_CACHE_TTL_SECS", 86_400)?, // 24h
            holiday_cache_years: var("HOLIDAY_CACHE_YEARS", 8)?,

            rate_trigger_per_min: var("RATE_TRIGGER_PER_MIN", 30)?,
        };

        for (job, expr) in config.schedules() {
            scheduler::validate_cron_expression(&expr)
                .with_context(|| format!("schedule for {job}"))?;
        }
        Ok(config)
    }

    /// Cron expression per job.
    pub fn schedules(&self) -> Vec<(JobKind, String)> {
        vec![
            (JobKind::DailySummary, self.cron_daily_summary.clone()),
            (JobKind::MonthlySummary, self.cron_monthly_summary.clone()),
            (JobKind::HolidaySync, self.cron_holiday_sync.clone()),
            (JobKind::CacheRefresh, self.cron_cache_refresh.clone()),
        ]
    }

    pub fn holiday_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.holiday_cache_ttl_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
