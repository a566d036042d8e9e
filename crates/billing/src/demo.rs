//! Subscription lifecycle demos
//!
//! Each demo creates its own test clock and customer, drives the subscription
//! through a cancel or resume flow by moving the clock, and reports what the
//! platform ended up with.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::calendar::ClockOffset;
use crate::catalog::{CatalogService, DemoCatalog, PREMIUM_MONTHLY};
use crate::clock::ClockService;
use crate::config::SimulationSettings;
use crate::error::{BillingError, BillingResult};
use crate::platform::BillingPlatform;
use crate::poll::{PollOutcome, Sleeper};
use crate::renewal::{calculate_remaining_months, RenewalWindow};
use crate::resources::{
    timestamp_to_datetime, Metadata, ProrationBehavior, ScheduleStatus, Subscription,
    SubscriptionStatus, TestClock,
};
use crate::schedule::ScheduleService;
use crate::subscription::{SubscriptionService, SubscriptionSpecs};

/// Available demos, named as on the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Demo {
    CreateProducts,
    CancelSubscription,
    CancelSubscriptionWithCancelAt,
    CancelSubscriptionWithSchedule,
    ResumeSubscription,
    #[default]
    ResumeSubscriptionWithSchedule,
}

impl Demo {
    pub const ALL: [Demo; 6] = [
        Demo::CreateProducts,
        Demo::CancelSubscription,
        Demo::CancelSubscriptionWithCancelAt,
        Demo::CancelSubscriptionWithSchedule,
        Demo::ResumeSubscription,
        Demo::ResumeSubscriptionWithSchedule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Demo::CreateProducts => "CreateProducts",
            Demo::CancelSubscription => "CancelSubscription",
            Demo::CancelSubscriptionWithCancelAt => "CancelSubscriptionWithCancelAt",
            Demo::CancelSubscriptionWithSchedule => "CancelSubscriptionWithSchedule",
            Demo::ResumeSubscription => "ResumeSubscription",
            Demo::ResumeSubscriptionWithSchedule => "ResumeSubscriptionWithSchedule",
        }
    }
}

impl std::fmt::Display for Demo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Demo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Demo::ALL
            .into_iter()
            .find(|demo| demo.as_str() == s.trim())
            .ok_or_else(|| {
                let valid: Vec<&str> = Demo::ALL.iter().map(|d| d.as_str()).collect();
                format!("Invalid demo '{}'. Valid demos are: {}", s, valid.join(", "))
            })
    }
}

/// Short random id that keeps demo customers apart
pub fn generate_run_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Summary of one subscription demo run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DemoReport {
    pub demo: Demo,
    pub name: String,
    pub email: String,
    pub test_clock_id: String,
    pub start: DateTime<Utc>,
    /// When cancellation was requested (or takes effect, for period-end cancels)
    pub cancel: Option<DateTime<Utc>>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub annual_renewal_date: Option<DateTime<Utc>>,
    pub remaining_months: Option<i32>,
    pub subscription_id: String,
    pub subscription_status: SubscriptionStatus,
    /// False when the status wait ran out of attempts
    pub status_confirmed: bool,
    pub schedule_status: Option<ScheduleStatus>,
    pub latest_invoice: Option<String>,
    pub paid_invoices: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DemoOutcome {
    Catalog(DemoCatalog),
    Subscription(Box<DemoReport>),
}

/// Per-run state shared by the subscription demos
struct Simulation {
    demo: Demo,
    name: String,
    email: String,
    clock: TestClock,
    subscription: Subscription,
}

impl Simulation {
    fn start_date(&self) -> BillingResult<DateTime<Utc>> {
        timestamp_to_datetime(self.subscription.start_date)
    }

    fn price_id(&self) -> BillingResult<String> {
        self.subscription
            .primary_price_id()
            .map(str::to_string)
            .ok_or_else(|| {
                BillingError::NotFound(format!("price on subscription {}", self.subscription.id))
            })
    }
}

/// Fields that differ between demos
#[derive(Default)]
struct ReportDetails {
    cancel: Option<DateTime<Utc>>,
    cancel_at: Option<DateTime<Utc>>,
    window: Option<RenewalWindow>,
    schedule_status: Option<ScheduleStatus>,
}

pub struct DemoRunner<P: BillingPlatform + ?Sized> {
    clocks: ClockService<P>,
    subscriptions: SubscriptionService<P>,
    schedules: ScheduleService<P>,
    catalog: CatalogService<P>,
    settings: SimulationSettings,
    start_time: Option<DateTime<Utc>>,
    run_id: Option<String>,
}

impl<P: BillingPlatform + ?Sized> DemoRunner<P> {
    pub fn new(platform: Arc<P>, sleeper: Arc<dyn Sleeper>, settings: SimulationSettings) -> Self {
        Self {
            clocks: ClockService::new(platform.clone(), sleeper.clone(), settings),
            subscriptions: SubscriptionService::new(
                platform.clone(),
                sleeper,
                settings.status_poll,
            ),
            schedules: ScheduleService::new(platform.clone()),
            catalog: CatalogService::new(platform),
            settings,
            start_time: None,
            run_id: None,
        }
    }

    /// Freeze new test clocks at `start` instead of the current time.
    pub fn with_start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub async fn run(&self, demo: Demo) -> BillingResult<DemoOutcome> {
        tracing::info!(demo = %demo, "Running demo");

        let outcome = match demo {
            Demo::CreateProducts => {
                DemoOutcome::Catalog(self.catalog.ensure_demo_catalog().await?)
            }
            Demo::CancelSubscription => self.cancel_subscription().await?,
            Demo::CancelSubscriptionWithCancelAt => {
                self.cancel_subscription_with_cancel_at().await?
            }
            Demo::CancelSubscriptionWithSchedule => self.cancel_subscription_with_schedule().await?,
            Demo::ResumeSubscription => self.resume_subscription().await?,
            Demo::ResumeSubscriptionWithSchedule => self.resume_subscription_with_schedule().await?,
        };

        tracing::info!(demo = %demo, "Demo done");
        Ok(outcome)
    }

    // =========================================================================
    // Setup and reporting
    // =========================================================================

    async fn setup(
        &self,
        demo: Demo,
        proration_behavior: Option<ProrationBehavior>,
    ) -> BillingResult<Simulation> {
        let run_id = self.run_id.clone().unwrap_or_else(generate_run_id);
        let name = format!("Hoss Monthly {}", run_id);
        let email = format!("hoss+m{}@aerocov.dev", run_id);

        let clock = self
            .clocks
            .create_test_clock_at(&name, self.start_time.unwrap_or_else(Utc::now))
            .await?;

        let created = self
            .subscriptions
            .create_customer_subscription(SubscriptionSpecs {
                price_lookup_key: PREMIUM_MONTHLY.to_string(),
                name: name.clone(),
                email: email.clone(),
                metadata: Metadata::from([("runId".to_string(), run_id)]),
                test_clock_id: Some(clock.id.clone()),
                proration_behavior,
            })
            .await?;

        Ok(Simulation {
            demo,
            name,
            email,
            clock,
            subscription: created.subscription,
        })
    }

    async fn report(
        &self,
        sim: Simulation,
        outcome: PollOutcome<Subscription>,
        details: ReportDetails,
    ) -> BillingResult<DemoOutcome> {
        let status_confirmed = outcome.is_converged();
        let subscription = outcome.into_inner();
        let paid_invoices = self
            .subscriptions
            .paid_invoice_count(&subscription.id)
            .await?;

        let report = DemoReport {
            demo: sim.demo,
            start: sim.start_date()?,
            name: sim.name,
            email: sim.email,
            test_clock_id: sim.clock.id,
            cancel: details.cancel,
            cancel_at: details.cancel_at,
            annual_renewal_date: details.window.as_ref().map(|w| w.annual_renewal_date),
            remaining_months: details.window.as_ref().map(|w| w.remaining_months),
            subscription_id: subscription.id,
            subscription_status: subscription.status,
            status_confirmed,
            schedule_status: details.schedule_status,
            latest_invoice: subscription.latest_invoice,
            paid_invoices,
        };

        tracing::info!(
            demo = %report.demo,
            subscription_id = %report.subscription_id,
            subscription_status = %report.subscription_status,
            paid_invoices = report.paid_invoices,
            "Demo report"
        );
        Ok(DemoOutcome::Subscription(Box::new(report)))
    }

    /// Cancellation request `offset` after the start, sized against the renewal
    fn renewal_window(
        &self,
        sim: &Simulation,
        offset: ClockOffset,
    ) -> BillingResult<RenewalWindow> {
        let start = sim.start_date()?;
        let cancel = offset
            .apply(start)
            .ok_or_else(|| BillingError::Timestamp(format!("{} + {:?}", start, offset)))?;
        Ok(calculate_remaining_months(start, cancel)?)
    }

    // =========================================================================
    // Demos
    // =========================================================================

    /// Cancel at period end and let the period run out.
    async fn cancel_subscription(&self) -> BillingResult<DemoOutcome> {
        let sim = self.setup(Demo::CancelSubscription, None).await?;
        let end = timestamp_to_datetime(sim.subscription.current_period_end)?;

        self.subscriptions
            .cancel_at_period_end(&sim.subscription.id)
            .await?;
        self.clocks
            .advance_to(&sim.clock.id, end, self.settings.shortest_interval)
            .await?;

        let outcome = self
            .subscriptions
            .wait_for_status(&sim.subscription.id, SubscriptionStatus::Canceled)
            .await?;

        self.report(
            sim,
            outcome,
            ReportDetails {
                cancel: Some(end),
                ..Default::default()
            },
        )
        .await
    }

    /// Request cancellation a month and ten days in, effective at the annual
    /// renewal through `cancel_at`.
    async fn cancel_subscription_with_cancel_at(&self) -> BillingResult<DemoOutcome> {
        let sim = self
            .setup(
                Demo::CancelSubscriptionWithCancelAt,
                Some(ProrationBehavior::None),
            )
            .await?;
        let window = self.renewal_window(
            &sim,
            ClockOffset {
                months: 1,
                days: 10,
                ..Default::default()
            },
        )?;
        let interval = self.settings.shortest_interval;

        self.clocks
            .advance_to(&sim.clock.id, window.cancel, interval)
            .await?;
        self.subscriptions
            .cancel_at(&sim.subscription.id, window.annual_renewal_date.timestamp())
            .await?;

        // still well before the renewal
        self.clocks
            .advance_by(&sim.clock.id, ClockOffset::months(2))
            .await?;
        self.subscriptions
            .wait_for_status(&sim.subscription.id, SubscriptionStatus::Active)
            .await?;

        self.clocks
            .advance_to(&sim.clock.id, window.annual_renewal_date, interval)
            .await?;
        let outcome = self
            .subscriptions
            .wait_for_status(&sim.subscription.id, SubscriptionStatus::Canceled)
            .await?;

        self.report(
            sim,
            outcome,
            ReportDetails {
                cancel: Some(window.cancel),
                cancel_at: Some(window.annual_renewal_date),
                window: Some(window),
                ..Default::default()
            },
        )
        .await
    }

    /// Advance to the cancellation request and hand the subscription to a
    /// schedule that bills the remaining months and then cancels.
    async fn schedule_remaining_months(
        &self,
        demo: Demo,
    ) -> BillingResult<(Simulation, RenewalWindow, String)> {
        let sim = self.setup(demo, None).await?;
        let window = self.renewal_window(
            &sim,
            ClockOffset {
                months: 1,
                days: 15,
                ..Default::default()
            },
        )?;

        self.clocks
            .advance_to(&sim.clock.id, window.cancel, self.settings.shortest_interval)
            .await?;

        let schedule = self
            .schedules
            .schedule_cancellation(&sim.subscription.id, &sim.price_id()?, &window)
            .await?;

        Ok((sim, window, schedule.id))
    }

    async fn cancel_subscription_with_schedule(&self) -> BillingResult<DemoOutcome> {
        let (sim, window, schedule_id) = self
            .schedule_remaining_months(Demo::CancelSubscriptionWithSchedule)
            .await?;

        self.clocks
            .advance_to(
                &sim.clock.id,
                window.annual_renewal_date,
                self.settings.shortest_interval,
            )
            .await?;
        let outcome = self
            .subscriptions
            .wait_for_status(&sim.subscription.id, SubscriptionStatus::Canceled)
            .await?;
        let schedule = self.schedules.retrieve(&schedule_id).await?;

        self.report(
            sim,
            outcome,
            ReportDetails {
                cancel: Some(window.cancel),
                window: Some(window),
                schedule_status: Some(schedule.status),
                ..Default::default()
            },
        )
        .await
    }

    /// Cancel at period end, change our mind two days later.
    async fn resume_subscription(&self) -> BillingResult<DemoOutcome> {
        let sim = self.setup(Demo::ResumeSubscription, None).await?;
        let end = timestamp_to_datetime(sim.subscription.current_period_end)?;

        self.subscriptions
            .cancel_at_period_end(&sim.subscription.id)
            .await?;
        self.clocks
            .advance_by(&sim.clock.id, ClockOffset::days(2))
            .await?;
        self.subscriptions.resume(&sim.subscription.id).await?;

        self.clocks
            .advance_to(&sim.clock.id, end, self.settings.shortest_interval)
            .await?;
        let outcome = self
            .subscriptions
            .wait_for_status(&sim.subscription.id, SubscriptionStatus::Active)
            .await?;

        self.report(
            sim,
            outcome,
            ReportDetails {
                cancel: Some(end),
                ..Default::default()
            },
        )
        .await
    }

    /// Schedule the cancellation, then release the schedule before it takes
    /// effect and check the subscription keeps renewing past the anniversary.
    async fn resume_subscription_with_schedule(&self) -> BillingResult<DemoOutcome> {
        let (sim, window, schedule_id) = self
            .schedule_remaining_months(Demo::ResumeSubscriptionWithSchedule)
            .await?;
        let interval = self.settings.shortest_interval;

        // must stay before the renewal, where the schedule would cancel
        self.clocks
            .advance_by(&sim.clock.id, ClockOffset::months(2))
            .await?;
        let schedule = self.schedules.release(&schedule_id).await?;

        self.clocks
            .advance_to(&sim.clock.id, window.annual_renewal_date, interval)
            .await?;
        for _ in 0..3 {
            self.clocks
                .advance_by(&sim.clock.id, ClockOffset::months(1))
                .await?;
        }

        let outcome = self
            .subscriptions
            .wait_for_status(&sim.subscription.id, SubscriptionStatus::Active)
            .await?;

        self.report(
            sim,
            outcome,
            ReportDetails {
                cancel: Some(window.cancel),
                window: Some(window),
                schedule_status: Some(schedule.status),
                ..Default::default()
            },
        )
        .await
    }
}
