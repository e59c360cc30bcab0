//! Quota and rate gating across three caller scopes.
//!
//! Gating order for one generation request: global scope, then per-user
//! daily scope, then (elevated tier only) the client-side rolling window.
//! The first failing scope rejects with its own scope tag so callers can
//! render an accurate reset estimate. All resets are lazy: rollover happens
//! at read or increment time, never via a background timer.

use crate::config::Limits;
use crate::error::{GenerateError, QuotaScope, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Subscription tier, determining the per-user daily ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Base,
    Elevated,
}

impl Tier {
    pub fn daily_limit(self, limits: &Limits) -> u32 {
        match self {
            Tier::Base => limits.base_daily_limit,
            Tier::Elevated => limits.elevated_daily_limit,
        }
    }
}

/// Per-user usage as read from the durable store.
#[derive(Debug, Clone)]
pub struct UserUsage {
    pub tier: Tier,
    pub uploads_today: u32,
    pub daily_reset_at: DateTime<Utc>,
}

/// Durable per-user counter boundary. A failed increment must not corrupt
/// state; implementations fall back to read-modify-write when an atomic
/// increment is unavailable.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn read_usage(&self, user_id: &str) -> Result<UserUsage, StoreError>;
    async fn increment_usage(&self, user_id: &str) -> Result<(), StoreError>;
}

/// Process-local usage store. The durable store behind the production
/// deployment is an external service; this stands in for it in tests, the
/// CLI, and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    users: Mutex<HashMap<String, UserUsage>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tier(&self, user_id: &str, tier: Tier) {
        let mut users = self.users.lock().unwrap();
        let entry = users
            .entry(user_id.to_string())
            .or_insert_with(|| fresh_usage(Utc::now()));
        entry.tier = tier;
    }

    /// Seed a user's counter directly. Test hook.
    pub fn set_uploads_today(&self, user_id: &str, uploads: u32) {
        let mut users = self.users.lock().unwrap();
        let entry = users
            .entry(user_id.to_string())
            .or_insert_with(|| fresh_usage(Utc::now()));
        entry.uploads_today = uploads;
    }
}

fn fresh_usage(now: DateTime<Utc>) -> UserUsage {
    UserUsage {
        tier: Tier::Base,
        uploads_today: 0,
        daily_reset_at: now + Duration::days(1),
    }
}

fn rollover_daily(usage: &mut UserUsage, now: DateTime<Utc>) {
    if now >= usage.daily_reset_at {
        usage.uploads_today = 0;
        usage.daily_reset_at = now + Duration::days(1);
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn read_usage(&self, user_id: &str) -> Result<UserUsage, StoreError> {
        let mut users = self.users.lock().unwrap();
        let entry = users
            .entry(user_id.to_string())
            .or_insert_with(|| fresh_usage(Utc::now()));
        rollover_daily(entry, Utc::now());
        Ok(entry.clone())
    }

    async fn increment_usage(&self, user_id: &str) -> Result<(), StoreError> {
        let mut users = self.users.lock().unwrap();
        let entry = users
            .entry(user_id.to_string())
            .or_insert_with(|| fresh_usage(Utc::now()));
        rollover_daily(entry, Utc::now());
        entry.uploads_today += 1;
        Ok(())
    }
}

/// Process-wide generation counter with a lazily rolled reset period.
#[derive(Debug)]
pub struct GlobalQuota {
    state: Mutex<GlobalState>,
    ceiling: u32,
    period: Duration,
}

#[derive(Debug)]
struct GlobalState {
    count: u32,
    reset_at: DateTime<Utc>,
}

impl GlobalQuota {
    pub fn new(ceiling: u32, period: Duration) -> Self {
        Self {
            state: Mutex::new(GlobalState {
                count: 0,
                reset_at: Utc::now() + period,
            }),
            ceiling,
            period,
        }
    }

    pub fn check(&self) -> Result<(), GenerateError> {
        self.check_at(Utc::now())
    }

    pub fn check_at(&self, now: DateTime<Utc>) -> Result<(), GenerateError> {
        let mut state = self.state.lock().unwrap();
        Self::rollover(&mut state, self.period, now);
        if state.count < self.ceiling {
            Ok(())
        } else {
            Err(GenerateError::GlobalQuota {
                reset_at: state.reset_at,
            })
        }
    }

    pub fn charge(&self) {
        self.charge_at(Utc::now());
    }

    pub fn charge_at(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        Self::rollover(&mut state, self.period, now);
        state.count += 1;
    }

    pub fn count(&self) -> u32 {
        self.state.lock().unwrap().count
    }

    fn rollover(state: &mut GlobalState, period: Duration, now: DateTime<Utc>) {
        if now >= state.reset_at {
            state.count = 0;
            state.reset_at = now + period;
        }
    }
}

/// Outcome of a rolling-window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    pub allowed: bool,
    pub scope: Option<QuotaScope>,
    pub next_allowed_at: Option<DateTime<Utc>>,
}

/// Client-side advisory rate window for elevated-tier callers: an ordered
/// log of upload timestamps pruned to a one-day lookback, from which hourly
/// and daily counts are derived.
#[derive(Debug)]
pub struct RateWindow {
    samples: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
    hourly_ceiling: u32,
    daily_ceiling: u32,
}

impl RateWindow {
    pub fn new(hourly_ceiling: u32, daily_ceiling: u32) -> Self {
        Self {
            samples: Mutex::new(HashMap::new()),
            hourly_ceiling,
            daily_ceiling,
        }
    }

    pub fn record(&self, user_id: &str) {
        self.record_at(user_id, Utc::now());
    }

    pub fn record_at(&self, user_id: &str, at: DateTime<Utc>) {
        let mut samples = self.samples.lock().unwrap();
        // Prune outside the widest window while we hold the lock, and drop
        // users whose whole log has aged out so idle callers do not pin map
        // entries forever.
        let floor = at - Duration::days(1);
        samples.retain(|_, log| log.iter().any(|&t| t > floor));
        let log = samples.entry(user_id.to_string()).or_default();
        log.retain(|&t| t > floor);
        log.push(at);
    }

    pub fn check(&self, user_id: &str) -> WindowDecision {
        self.check_at(user_id, Utc::now())
    }

    /// Number of users currently holding at least one sample.
    pub fn tracked_users(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    pub fn check_at(&self, user_id: &str, now: DateTime<Utc>) -> WindowDecision {
        let samples = self.samples.lock().unwrap();
        let log = match samples.get(user_id) {
            Some(log) => log,
            None => {
                return WindowDecision {
                    allowed: true,
                    scope: None,
                    next_allowed_at: None,
                }
            }
        };

        let hour_floor = now - Duration::hours(1);
        let day_floor = now - Duration::days(1);
        let hourly: Vec<_> = log.iter().filter(|&&t| t > hour_floor).collect();
        let daily: Vec<_> = log.iter().filter(|&&t| t > day_floor).collect();

        let hourly_full = hourly.len() as u32 >= self.hourly_ceiling;
        let daily_full = daily.len() as u32 >= self.daily_ceiling;
        if !hourly_full && !daily_full {
            return WindowDecision {
                allowed: true,
                scope: None,
                next_allowed_at: None,
            };
        }

        // Earliest time the oldest blocking sample ages out of whichever
        // window is saturated; minimum of the two when both are.
        let hourly_reset = hourly
            .iter()
            .min()
            .map(|&&oldest| oldest + Duration::hours(1));
        let daily_reset = daily
            .iter()
            .min()
            .map(|&&oldest| oldest + Duration::days(1));
        let next_allowed_at = match (
            hourly_full.then_some(hourly_reset).flatten(),
            daily_full.then_some(daily_reset).flatten(),
        ) {
            (Some(h), Some(d)) => Some(h.min(d)),
            (Some(h), None) => Some(h),
            (None, Some(d)) => Some(d),
            (None, None) => None,
        };

        WindowDecision {
            allowed: false,
            scope: Some(if daily_full {
                QuotaScope::Daily
            } else {
                QuotaScope::Hourly
            }),
            next_allowed_at,
        }
    }
}

/// Composes the three scopes behind the gating order the orchestrator uses.
pub struct QuotaGovernor {
    global: GlobalQuota,
    store: Arc<dyn UsageStore>,
    window: RateWindow,
    limits: Limits,
}

impl QuotaGovernor {
    pub fn new(store: Arc<dyn UsageStore>, limits: Limits) -> Self {
        Self {
            global: GlobalQuota::new(limits.global_ceiling, limits.global_period),
            store,
            window: RateWindow::new(limits.window_hourly_ceiling, limits.window_daily_ceiling),
            limits,
        }
    }

    /// Global scope gate, consulted before authentication.
    pub fn check_global(&self) -> Result<(), GenerateError> {
        self.global.check()
    }

    /// Per-user gates, consulted after authentication. Returns the caller's
    /// tier on success so the later charge records the right scopes. A store
    /// read failure degrades to zero-usage assumptions rather than blocking.
    pub async fn admit_user(&self, user_id: &str) -> Result<Tier, GenerateError> {
        let now = Utc::now();
        let mut usage = match self.store.read_usage(user_id).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(user_id, error = %e, "usage store read failed, assuming zero usage");
                fresh_usage(now)
            }
        };
        rollover_daily(&mut usage, now);

        if usage.uploads_today >= usage.tier.daily_limit(&self.limits) {
            return Err(GenerateError::UserQuota {
                scope: QuotaScope::Daily,
                reset_at: usage.daily_reset_at,
            });
        }

        if usage.tier == Tier::Elevated {
            let decision = self.window.check_at(user_id, now);
            if !decision.allowed {
                return Err(GenerateError::UserQuota {
                    scope: decision.scope.unwrap_or(QuotaScope::Hourly),
                    reset_at: decision.next_allowed_at.unwrap_or(now),
                });
            }
        }

        Ok(usage.tier)
    }

    /// Charge every scope after all gates passed, before the model call.
    /// A failed increment is logged and accepted, never fatal.
    pub async fn charge(&self, user_id: &str, tier: Tier) {
        self.global.charge();
        if let Err(e) = self.store.increment_usage(user_id).await {
            warn!(user_id, error = %e, "usage store increment failed");
        }
        if tier == Tier::Elevated {
            self.window.record(user_id);
        }
    }

    pub fn global(&self) -> &GlobalQuota {
        &self.global
    }
}
