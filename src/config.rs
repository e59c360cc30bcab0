use chrono::Duration;
use std::env;

/// Trait for clients that retrieve their API key from the environment.
pub trait KeyFromEnv {
    /// The environment variable name for this client's API key
    const KEY_NAME: &'static str;

    /// Find the API key by checking the environment, loading `.env` first.
    fn find_key() -> Option<String> {
        // Silently ignore a missing .env file
        let _ = dotenvy::dotenv();
        env::var(Self::KEY_NAME).ok()
    }
}

/// Every tunable ceiling and window of the pipeline. Defaults match the
/// shipped product values; tests construct their own.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Upper bound on the requested question count
    pub max_count: u32,
    /// Requested count when the caller omits one
    pub default_count: u32,
    /// Process-wide generations per global period
    pub global_ceiling: u32,
    /// Global counter reset period
    pub global_period: Duration,
    /// Daily uploads for base-tier callers
    pub base_daily_limit: u32,
    /// Daily uploads for elevated-tier callers
    pub elevated_daily_limit: u32,
    /// Rolling-window hourly ceiling (elevated tier, advisory)
    pub window_hourly_ceiling: u32,
    /// Rolling-window daily ceiling (elevated tier, advisory)
    pub window_daily_ceiling: u32,
    /// Freshness window for cached MCQ sets
    pub cache_ttl: Duration,
    /// Entry count above which `put` sweeps stale entries
    pub cache_max_entries: usize,
    /// Generation config passed to the model
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_count: 40,
            default_count: 20,
            global_ceiling: 1000,
            global_period: Duration::days(30),
            base_daily_limit: 5,
            elevated_daily_limit: 100,
            window_hourly_ceiling: 20,
            window_daily_ceiling: 100,
            cache_ttl: Duration::hours(2),
            cache_max_entries: 128,
            max_output_tokens: 8192,
            temperature: 0.7,
        }
    }
}
