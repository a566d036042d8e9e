//! Test clock orchestration
//!
//! The platform only lets a clock move a bounded distance relative to the
//! shortest subscription interval, and only while it is `ready`. Long jumps are
//! therefore broken into single-interval steps, each followed by a readiness
//! wait, and finished with one exact advance to the target.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::calendar::{ClockInterval, ClockOffset};
use crate::config::SimulationSettings;
use crate::error::{BillingError, BillingResult};
use crate::platform::TestClockApi;
use crate::poll::{wait_for_condition, PollOutcome, Sleeper};
use crate::resources::{timestamp_to_datetime, TestClock};

/// Creates and advances test clocks
pub struct ClockService<P: ?Sized> {
    platform: Arc<P>,
    sleeper: Arc<dyn Sleeper>,
    settings: SimulationSettings,
}

impl<P: TestClockApi + ?Sized> ClockService<P> {
    pub fn new(platform: Arc<P>, sleeper: Arc<dyn Sleeper>, settings: SimulationSettings) -> Self {
        Self {
            platform,
            sleeper,
            settings,
        }
    }

    /// Create a clock frozen at the current wall-clock time.
    pub async fn create_test_clock(&self, name: &str) -> BillingResult<TestClock> {
        self.create_test_clock_at(name, Utc::now()).await
    }

    pub async fn create_test_clock_at(
        &self,
        name: &str,
        frozen_at: DateTime<Utc>,
    ) -> BillingResult<TestClock> {
        let clock = self
            .platform
            .create_test_clock(frozen_at.timestamp(), name)
            .await?;
        tracing::info!(clock_id = %clock.id, frozen_time = %frozen_at, "Test clock created");
        Ok(clock)
    }

    /// Poll until the clock is `ready` at or past `frozen_time`.
    ///
    /// Running out of attempts is fatal: the error carries the last snapshot.
    pub async fn wait_until_ready(
        &self,
        clock_id: &str,
        frozen_time: i64,
    ) -> BillingResult<TestClock> {
        let platform = &self.platform;
        let outcome = wait_for_condition(
            || platform.retrieve_test_clock(clock_id),
            |clock: &TestClock| clock.is_ready_at(frozen_time),
            &self.settings.clock_poll,
            self.sleeper.as_ref(),
        )
        .await?;

        match outcome {
            PollOutcome::Converged { value, attempts } => {
                tracing::debug!(clock_id = %clock_id, attempts = attempts, "Test clock ready");
                Ok(value)
            }
            PollOutcome::Exhausted { last, attempts } => {
                tracing::error!(
                    clock_id = %clock_id,
                    attempts = attempts,
                    frozen_time = last.frozen_time,
                    status = %last.status,
                    "Test clock did not become ready"
                );
                Err(BillingError::ClockNotReady {
                    clock_id: clock_id.to_string(),
                    attempts,
                    frozen_time: last.frozen_time,
                    status: last.status.to_string(),
                    created: last.created,
                })
            }
        }
    }

    /// Fresh read of a clock that is not mid-advance
    async fn current(&self, clock_id: &str) -> BillingResult<TestClock> {
        self.wait_until_ready(clock_id, i64::MIN).await
    }

    /// Advance to an exact instant and wait for the platform to settle there.
    pub async fn advance(&self, clock_id: &str, frozen_time: i64) -> BillingResult<TestClock> {
        tracing::debug!(clock_id = %clock_id, frozen_time = frozen_time, "Advancing test clock");
        self.platform
            .advance_test_clock(clock_id, frozen_time)
            .await?;
        self.wait_until_ready(clock_id, frozen_time).await
    }

    /// Advance by a calendar offset relative to the clock's current time.
    pub async fn advance_by(
        &self,
        clock_id: &str,
        offset: ClockOffset,
    ) -> BillingResult<TestClock> {
        let clock = self.current(clock_id).await?;
        let from = clock.frozen_at()?;
        let target = offset
            .apply(from)
            .ok_or_else(|| BillingError::Timestamp(format!("{} + {:?}", from, offset)))?;

        tracing::info!(
            clock_id = %clock_id,
            from = %from,
            to = %target,
            "Advancing test clock by offset"
        );
        self.advance(clock_id, target.timestamp()).await
    }

    /// Advance to `target` (plus the configured buffer) in steps no longer
    /// than `interval`.
    ///
    /// Targets at or behind the clock's current time are skipped.
    pub async fn advance_to(
        &self,
        clock_id: &str,
        target: DateTime<Utc>,
        interval: ClockInterval,
    ) -> BillingResult<TestClock> {
        let buffer = Duration::from_std(self.settings.advance_buffer)
            .map_err(|e| BillingError::Config(format!("advance buffer: {}", e)))?;
        let destination = target + buffer;

        let clock = self.current(clock_id).await?;
        let frozen = clock.frozen_at()?;
        if destination <= frozen {
            tracing::warn!(
                clock_id = %clock_id,
                frozen_time = %frozen,
                target = %destination,
                "Test clock already past target, not advancing"
            );
            return Ok(clock);
        }

        let steps = interval
            .units_between(frozen, destination)
            .ok_or_else(|| BillingError::Timestamp(destination.to_string()))?;
        tracing::info!(
            clock_id = %clock_id,
            from = %frozen,
            to = %destination,
            steps = steps,
            interval = %interval,
            "Advancing test clock to target"
        );

        let mut current = clock;
        for step in 0..steps {
            let next = interval
                .step(current.frozen_at()?)
                .ok_or_else(|| BillingError::Timestamp(current.frozen_time.to_string()))?;
            if next >= destination {
                break;
            }
            tracing::debug!(clock_id = %clock_id, step = step + 1, to = %next, "Clock step");
            // the settled clock is the base for the next step; it may sit past `next`
            current = self.advance(clock_id, next.timestamp()).await?;
        }

        if current.frozen_time >= destination.timestamp() {
            tracing::warn!(
                clock_id = %clock_id,
                frozen_time = current.frozen_time,
                target = %destination,
                "Test clock settled past target"
            );
            return Ok(current);
        }

        self.advance(clock_id, destination.timestamp()).await
    }

    /// The clock's current frozen time
    pub async fn frozen_time(&self, clock_id: &str) -> BillingResult<DateTime<Utc>> {
        let clock = self.platform.retrieve_test_clock(clock_id).await?;
        timestamp_to_datetime(clock.frozen_time)
    }
}
