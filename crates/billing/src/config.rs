//! Environment configuration
//!
//! Every loader reads through a lookup closure; `from_env` simply plugs in
//! `std::env::var`, so parsing can be exercised without touching the process
//! environment.

use std::time::Duration;

use crate::calendar::ClockInterval;
use crate::error::{BillingError, BillingResult};
use crate::poll::PollConfig;

const STRIPE_API_KEY_VAR: &str = "STRIPE_API_KEY";
const STRIPE_API_BASE_VAR: &str = "STRIPE_API_BASE";
const STRIPE_ENDPOINT_SECRET_VAR: &str = "STRIPE_ENDPOINT_SECRET";
const STRIPE_ENDPOINT_PORT_VAR: &str = "STRIPE_ENDPOINT_PORT";

const STATUS_POLL_INTERVAL_VAR: &str = "BILLCLOCK_STATUS_POLL_INTERVAL_MS";
const STATUS_POLL_ATTEMPTS_VAR: &str = "BILLCLOCK_STATUS_POLL_MAX_ATTEMPTS";
const CLOCK_POLL_INTERVAL_VAR: &str = "BILLCLOCK_CLOCK_POLL_INTERVAL_MS";
const CLOCK_POLL_ATTEMPTS_VAR: &str = "BILLCLOCK_CLOCK_POLL_MAX_ATTEMPTS";
const ADVANCE_BUFFER_VAR: &str = "BILLCLOCK_ADVANCE_BUFFER_SECS";
const SHORTEST_INTERVAL_VAR: &str = "BILLCLOCK_SHORTEST_INTERVAL";

pub const DEFAULT_WEBHOOK_PORT: u16 = 4242;
pub const DEFAULT_ADVANCE_BUFFER: Duration = Duration::from_secs(5 * 60);

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required<F>(lookup: &F, key: &str) -> BillingResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).ok_or_else(|| BillingError::Config(format!("{} must be set", key)))
}

fn parsed<F, T>(lookup: &F, key: &str) -> BillingResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| BillingError::Config(format!("Invalid {} '{}': {}", key, raw, e)))
        })
        .transpose()
}

/// Credentials and endpoint for the platform API
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    /// Overrides the public API host (mock servers)
    pub api_base: Option<String>,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> BillingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            secret_key: required(&lookup, STRIPE_API_KEY_VAR)?,
            api_base: lookup(STRIPE_API_BASE_VAR),
        })
    }
}

/// Webhook endpoint settings
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub endpoint_secret: String,
    pub port: u16,
}

impl WebhookConfig {
    pub fn from_env() -> BillingResult<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> BillingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            endpoint_secret: required(&lookup, STRIPE_ENDPOINT_SECRET_VAR)?,
            port: parsed(&lookup, STRIPE_ENDPOINT_PORT_VAR)?.unwrap_or(DEFAULT_WEBHOOK_PORT),
        })
    }
}

/// Polling and clock-advance tuning for the simulations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationSettings {
    pub status_poll: PollConfig,
    pub clock_poll: PollConfig,
    /// Added to every exact clock target to absorb timing slack
    pub advance_buffer: Duration,
    pub shortest_interval: ClockInterval,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            status_poll: PollConfig::subscription_status(),
            clock_poll: PollConfig::clock_ready(),
            advance_buffer: DEFAULT_ADVANCE_BUFFER,
            shortest_interval: ClockInterval::default(),
        }
    }
}

impl SimulationSettings {
    pub fn from_env() -> BillingResult<Self> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> BillingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(ms) = parsed::<_, u64>(&lookup, STATUS_POLL_INTERVAL_VAR)? {
            settings.status_poll.interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = parsed(&lookup, STATUS_POLL_ATTEMPTS_VAR)? {
            settings.status_poll.max_attempts = attempts;
        }
        if let Some(ms) = parsed::<_, u64>(&lookup, CLOCK_POLL_INTERVAL_VAR)? {
            settings.clock_poll.interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = parsed(&lookup, CLOCK_POLL_ATTEMPTS_VAR)? {
            settings.clock_poll.max_attempts = attempts;
        }
        if let Some(secs) = parsed::<_, u64>(&lookup, ADVANCE_BUFFER_VAR)? {
            settings.advance_buffer = Duration::from_secs(secs);
        }
        if let Some(interval) = parsed(&lookup, SHORTEST_INTERVAL_VAR)? {
            settings.shortest_interval = interval;
        }

        Ok(settings)
    }
}
