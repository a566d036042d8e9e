//! In-memory platform for tests
//!
//! `FakePlatform` keeps just enough state to play the subscription lifecycle
//! forward when its test clock moves: monthly renewals produce paid invoices
//! and a subscription ends at the earliest of `cancel_at`, the current period
//! end (when `cancel_at_period_end` is set) or the end of its schedule.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::calendar::{from_unix, shift_months};
use crate::error::{BillingError, BillingResult};
use crate::platform::{CatalogApi, CustomerApi, ScheduleApi, SubscriptionApi, TestClockApi};
use crate::poll::Sleeper;
use crate::resources::{
    CreateCustomer, CreatePrice, CreateProduct, CreateSubscription, Customer, EndBehavior,
    Invoice, PhaseItem, PhaseParams, Price, Product, Recurring, RecurringInterval, ScheduleStatus,
    SchedulePhase, Subscription, SubscriptionItem, SubscriptionSchedule, SubscriptionStatus,
    TestClock, TestClockStatus, UpdateSchedule, UpdateSubscription,
};

/// Records requested sleeps instead of waiting
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

#[derive(Debug)]
struct FakeClock {
    clock: TestClock,
    /// Reads left that still report `advancing`
    pending_reads: u32,
}

#[derive(Debug)]
struct FakeSubscription {
    subscription: Subscription,
    clock_id: Option<String>,
    /// Index of the current monthly period, counted from the start date
    period: u32,
    /// End of the schedule when it is set to cancel
    schedule_end: Option<i64>,
    invoices: Vec<Invoice>,
}

impl FakeSubscription {
    fn period_bounds(&self, period: u32) -> BillingResult<(i64, i64)> {
        let start = from_unix(self.subscription.start_date)
            .ok_or_else(|| BillingError::Timestamp(self.subscription.start_date.to_string()))?;
        let shift = |n: u32| {
            shift_months(start, i64::from(n))
                .map(|at| at.timestamp())
                .ok_or_else(|| BillingError::Timestamp(start.to_string()))
        };
        Ok((shift(period)?, shift(period + 1)?))
    }

    fn ends_at(&self) -> Option<i64> {
        let period_end = self
            .subscription
            .cancel_at_period_end
            .then_some(self.subscription.current_period_end);
        [self.subscription.cancel_at, period_end, self.schedule_end]
            .into_iter()
            .flatten()
            .min()
    }

    fn bill_period(&mut self) {
        let id = format!("in_{}_{}", self.subscription.id, self.invoices.len() + 1);
        self.subscription.latest_invoice = Some(id.clone());
        self.invoices.push(Invoice {
            id,
            status: Some("paid".to_string()),
            paid: Some(true),
            amount_paid: 1000,
            subscription: Some(self.subscription.id.clone()),
        });
    }

    /// Play renewals and cancellation forward to `now`.
    fn settle(&mut self, now: i64) -> BillingResult<()> {
        while self.subscription.status == SubscriptionStatus::Active {
            let period_end = self.subscription.current_period_end;

            if let Some(end) = self.ends_at() {
                if end <= now && end <= period_end {
                    self.subscription.status = SubscriptionStatus::Canceled;
                    break;
                }
            }

            if period_end > now {
                break;
            }

            self.period += 1;
            let (start, end) = self.period_bounds(self.period)?;
            self.subscription.current_period_start = start;
            self.subscription.current_period_end = end;
            self.bill_period();
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u32,
    clocks: HashMap<String, FakeClock>,
    customers: HashMap<String, Customer>,
    subscriptions: HashMap<String, FakeSubscription>,
    schedules: HashMap<String, SubscriptionSchedule>,
    products: Vec<Product>,
    prices: Vec<Price>,
    advance_calls: Vec<(String, i64)>,
    schedule_updates: Vec<UpdateSchedule>,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{}", prefix, self.next_id)
    }

    fn clock_mut(&mut self, clock_id: &str) -> BillingResult<&mut FakeClock> {
        self.clocks
            .get_mut(clock_id)
            .ok_or_else(|| BillingError::NotFound(format!("test clock {}", clock_id)))
    }

    fn subscription_mut(&mut self, id: &str) -> BillingResult<&mut FakeSubscription> {
        self.subscriptions
            .get_mut(id)
            .ok_or_else(|| BillingError::NotFound(format!("subscription {}", id)))
    }
}

/// In-memory stand-in for the billing platform
#[derive(Debug, Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
    /// Reads reporting `advancing` after each advance
    ready_after: u32,
    /// Seconds past the requested time each advance settles at
    overshoot_secs: i64,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clocks keep reporting `advancing` for `reads` retrievals after each advance.
    pub fn with_clock_lag(reads: u32) -> Self {
        Self {
            ready_after: reads,
            ..Self::default()
        }
    }

    /// Every advance settles `overshoot` past the requested time.
    pub fn with_advance_overshoot(overshoot: chrono::Duration) -> Self {
        Self {
            overshoot_secs: overshoot.num_seconds(),
            ..Self::default()
        }
    }

    pub fn advance_calls(&self) -> Vec<(String, i64)> {
        self.state.lock().unwrap().advance_calls.clone()
    }

    pub fn schedule_updates(&self) -> Vec<UpdateSchedule> {
        self.state.lock().unwrap().schedule_updates.clone()
    }

    pub fn products(&self) -> Vec<Product> {
        self.state.lock().unwrap().products.clone()
    }

    pub fn prices(&self) -> Vec<Price> {
        self.state.lock().unwrap().prices.clone()
    }

    pub fn customers(&self) -> Vec<Customer> {
        self.state.lock().unwrap().customers.values().cloned().collect()
    }

    /// Seed a monthly price the subscription flows can resolve.
    pub fn seed_price(&self, lookup_key: &str) -> Price {
        let mut state = self.state.lock().unwrap();
        let product = Product {
            id: state.next_id("prod"),
            name: format!("Product for {}", lookup_key),
            description: None,
            default_price: None,
        };
        let price = Price {
            id: state.next_id("price"),
            lookup_key: Some(lookup_key.to_string()),
            unit_amount: Some(1000),
            currency: "aud".to_string(),
            recurring: Some(Recurring {
                interval: RecurringInterval::Month,
            }),
            product_id: product.id.clone(),
            product: None,
        };
        state.products.push(product);
        state.prices.push(price.clone());
        price
    }

    /// Force a clock into a state, bypassing the advance bookkeeping.
    pub fn set_clock_status(&self, clock_id: &str, status: TestClockStatus, pending_reads: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(fake) = state.clocks.get_mut(clock_id) {
            fake.clock.status = status;
            fake.pending_reads = pending_reads;
        }
    }
}

#[async_trait]
impl TestClockApi for FakePlatform {
    async fn create_test_clock(&self, frozen_time: i64, name: &str) -> BillingResult<TestClock> {
        let mut state = self.state.lock().unwrap();
        let clock = TestClock {
            id: state.next_id("clock"),
            name: Some(name.to_string()),
            frozen_time,
            status: TestClockStatus::Ready,
            created: frozen_time,
        };
        state.clocks.insert(
            clock.id.clone(),
            FakeClock {
                clock: clock.clone(),
                pending_reads: 0,
            },
        );
        Ok(clock)
    }

    async fn retrieve_test_clock(&self, clock_id: &str) -> BillingResult<TestClock> {
        let mut state = self.state.lock().unwrap();
        let fake = state.clock_mut(clock_id)?;

        if fake.clock.status == TestClockStatus::Advancing {
            if fake.pending_reads == 0 {
                fake.clock.status = TestClockStatus::Ready;
            } else {
                fake.pending_reads -= 1;
            }
        }
        Ok(fake.clock.clone())
    }

    async fn advance_test_clock(
        &self,
        clock_id: &str,
        frozen_time: i64,
    ) -> BillingResult<TestClock> {
        let mut state = self.state.lock().unwrap();
        let ready_after = self.ready_after;
        let fake = state.clock_mut(clock_id)?;

        if fake.clock.status != TestClockStatus::Ready {
            return Err(BillingError::StripeApi(format!(
                "Test clock {} is currently advancing",
                clock_id
            )));
        }
        if frozen_time <= fake.clock.frozen_time {
            return Err(BillingError::StripeApi(
                "The new frozen time must be after the current frozen time".to_string(),
            ));
        }

        let settled_at = frozen_time + self.overshoot_secs;
        fake.clock.frozen_time = settled_at;
        fake.clock.status = TestClockStatus::Advancing;
        fake.pending_reads = ready_after;
        let snapshot = fake.clock.clone();

        state
            .advance_calls
            .push((clock_id.to_string(), frozen_time));

        let mut ended_schedules = Vec::new();
        for sub in state.subscriptions.values_mut() {
            if sub.clock_id.as_deref() == Some(clock_id) {
                sub.settle(settled_at)?;
                if sub.subscription.status == SubscriptionStatus::Canceled {
                    ended_schedules.extend(sub.subscription.schedule.clone());
                }
            }
        }
        for schedule_id in ended_schedules {
            if let Some(schedule) = state.schedules.get_mut(&schedule_id) {
                if schedule.status == ScheduleStatus::Active {
                    schedule.status = ScheduleStatus::Canceled;
                }
            }
        }

        Ok(snapshot)
    }
}

#[async_trait]
impl CustomerApi for FakePlatform {
    async fn create_customer(&self, params: CreateCustomer) -> BillingResult<Customer> {
        let mut state = self.state.lock().unwrap();
        if let Some(clock_id) = &params.test_clock {
            state.clock_mut(clock_id)?;
        }
        let customer = Customer {
            id: state.next_id("cus"),
            email: Some(params.email),
            name: Some(params.name),
            test_clock: params.test_clock,
        };
        state
            .customers
            .insert(customer.id.clone(), customer.clone());
        Ok(customer)
    }
}

#[async_trait]
impl SubscriptionApi for FakePlatform {
    async fn create_subscription(&self, params: CreateSubscription) -> BillingResult<Subscription> {
        let mut state = self.state.lock().unwrap();
        let customer = state
            .customers
            .get(&params.customer)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("customer {}", params.customer)))?;
        let clock_id = customer.test_clock.clone();
        let now = match &clock_id {
            Some(id) => state.clock_mut(id)?.clock.frozen_time,
            None => chrono::Utc::now().timestamp(),
        };

        let id = state.next_id("sub");
        let items = params
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| SubscriptionItem {
                id: format!("si_{}_{}", id, i),
                price: Some(item.price.clone()),
                quantity: Some(1),
            })
            .collect();

        let mut fake = FakeSubscription {
            subscription: Subscription {
                id: id.clone(),
                customer: customer.id,
                status: SubscriptionStatus::Active,
                start_date: now,
                current_period_start: now,
                current_period_end: now,
                cancel_at: None,
                cancel_at_period_end: false,
                items,
                latest_invoice: None,
                schedule: None,
            },
            clock_id,
            period: 0,
            schedule_end: None,
            invoices: Vec::new(),
        };
        let (_, end) = fake.period_bounds(0)?;
        fake.subscription.current_period_end = end;
        fake.bill_period();

        let subscription = fake.subscription.clone();
        state.subscriptions.insert(id, fake);
        Ok(subscription)
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> BillingResult<Subscription> {
        let mut state = self.state.lock().unwrap();
        Ok(state.subscription_mut(subscription_id)?.subscription.clone())
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        params: UpdateSubscription,
    ) -> BillingResult<Subscription> {
        let mut state = self.state.lock().unwrap();
        let fake = state.subscription_mut(subscription_id)?;

        if let Some(flag) = params.cancel_at_period_end {
            fake.subscription.cancel_at_period_end = flag;
        }
        if let Some(at) = params.cancel_at {
            fake.subscription.cancel_at = Some(at);
        }
        Ok(fake.subscription.clone())
    }

    async fn list_invoices(
        &self,
        subscription_id: &str,
        limit: u32,
    ) -> BillingResult<Vec<Invoice>> {
        let mut state = self.state.lock().unwrap();
        let fake = state.subscription_mut(subscription_id)?;
        Ok(fake
            .invoices
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ScheduleApi for FakePlatform {
    async fn create_schedule_from_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionSchedule> {
        let mut state = self.state.lock().unwrap();
        let schedule_id = state.next_id("sub_sched");
        let fake = state.subscription_mut(subscription_id)?;

        let phase = SchedulePhase {
            start_date: fake.subscription.current_period_start,
            end_date: fake.subscription.current_period_end,
            items: fake
                .subscription
                .items
                .iter()
                .filter_map(|item| {
                    item.price.clone().map(|price| PhaseItem {
                        price,
                        quantity: item.quantity,
                    })
                })
                .collect(),
            proration_behavior: None,
        };
        fake.subscription.schedule = Some(schedule_id.clone());

        let schedule = SubscriptionSchedule {
            id: schedule_id.clone(),
            status: ScheduleStatus::Active,
            subscription: Some(subscription_id.to_string()),
            end_behavior: EndBehavior::Release,
            phases: vec![phase],
        };
        state.schedules.insert(schedule_id, schedule.clone());
        Ok(schedule)
    }

    async fn retrieve_schedule(&self, schedule_id: &str) -> BillingResult<SubscriptionSchedule> {
        let state = self.state.lock().unwrap();
        state
            .schedules
            .get(schedule_id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("schedule {}", schedule_id)))
    }

    async fn update_schedule(
        &self,
        schedule_id: &str,
        params: UpdateSchedule,
    ) -> BillingResult<SubscriptionSchedule> {
        let mut state = self.state.lock().unwrap();
        state.schedule_updates.push(params.clone());

        let mut schedule = state
            .schedules
            .get(schedule_id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("schedule {}", schedule_id)))?;

        let phases = resolve_phases(&params.phases)?;
        let end = phases.last().map(|phase| phase.end_date);
        schedule.phases = phases;
        if let Some(behavior) = params.end_behavior {
            schedule.end_behavior = behavior;
        }

        if let Some(subscription_id) = schedule.subscription.clone() {
            let fake = state.subscription_mut(&subscription_id)?;
            fake.schedule_end = match schedule.end_behavior {
                EndBehavior::Cancel => end,
                _ => None,
            };
        }

        state
            .schedules
            .insert(schedule_id.to_string(), schedule.clone());
        Ok(schedule)
    }

    async fn release_schedule(
        &self,
        schedule_id: &str,
        preserve_cancel_date: bool,
    ) -> BillingResult<SubscriptionSchedule> {
        let mut state = self.state.lock().unwrap();
        let mut schedule = state
            .schedules
            .get(schedule_id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("schedule {}", schedule_id)))?;
        schedule.status = ScheduleStatus::Released;

        if let Some(subscription_id) = schedule.subscription.clone() {
            let fake = state.subscription_mut(&subscription_id)?;
            if preserve_cancel_date {
                fake.subscription.cancel_at = fake.schedule_end;
            }
            fake.schedule_end = None;
            fake.subscription.schedule = None;
        }

        state
            .schedules
            .insert(schedule_id.to_string(), schedule.clone());
        Ok(schedule)
    }
}

/// Lay out update phases back to back; `iterations` counts monthly cycles.
fn resolve_phases(params: &[PhaseParams]) -> BillingResult<Vec<SchedulePhase>> {
    let mut phases: Vec<SchedulePhase> = Vec::new();

    for param in params {
        let start = match (param.start_date, phases.last()) {
            (Some(start), _) => start,
            (None, Some(previous)) => previous.end_date,
            (None, None) => {
                return Err(BillingError::StripeApi(
                    "The first phase must have a start_date".to_string(),
                ))
            }
        };
        let end = match (param.end_date, param.iterations) {
            (Some(end), _) => end,
            (None, Some(iterations)) => {
                let from = from_unix(start)
                    .ok_or_else(|| BillingError::Timestamp(start.to_string()))?;
                shift_months(from, i64::from(iterations))
                    .map(|at| at.timestamp())
                    .ok_or_else(|| BillingError::Timestamp(start.to_string()))?
            }
            (None, None) => {
                return Err(BillingError::StripeApi(
                    "Phase needs an end_date or iterations".to_string(),
                ))
            }
        };

        phases.push(SchedulePhase {
            start_date: start,
            end_date: end,
            items: param
                .items
                .iter()
                .map(|item| PhaseItem {
                    price: item.price.clone(),
                    quantity: item.quantity,
                })
                .collect(),
            proration_behavior: param.proration_behavior,
        });
    }

    Ok(phases)
}

#[async_trait]
impl CatalogApi for FakePlatform {
    async fn search_products(&self, query: &str) -> BillingResult<Vec<Product>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .products
            .iter()
            .filter(|product| query.contains(&format!("name:'{}'", product.name)))
            .cloned()
            .collect())
    }

    async fn list_prices_by_lookup_keys(
        &self,
        lookup_keys: &[String],
    ) -> BillingResult<Vec<Price>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .prices
            .iter()
            .filter(|price| {
                price
                    .lookup_key
                    .as_ref()
                    .is_some_and(|key| lookup_keys.contains(key))
            })
            .map(|price| {
                let product = state.products.iter().find(|p| p.id == price.product_id);
                Price {
                    product: product.cloned(),
                    ..price.clone()
                }
            })
            .collect())
    }

    async fn create_product(&self, params: CreateProduct) -> BillingResult<Product> {
        let mut state = self.state.lock().unwrap();
        let product = Product {
            id: state.next_id("prod"),
            name: params.name,
            description: Some(params.description),
            default_price: None,
        };
        state.products.push(product.clone());
        Ok(product)
    }

    async fn create_price(&self, params: CreatePrice) -> BillingResult<Price> {
        let mut state = self.state.lock().unwrap();
        let price = Price {
            id: state.next_id("price"),
            lookup_key: Some(params.lookup_key),
            unit_amount: Some(params.unit_amount),
            currency: params.currency,
            recurring: Some(params.recurring),
            product_id: params.product,
            product: None,
        };
        state.prices.push(price.clone());
        Ok(price)
    }

    async fn set_default_price(&self, product_id: &str, price_id: &str) -> BillingResult<Product> {
        let mut state = self.state.lock().unwrap();
        let product = state
            .products
            .iter_mut()
            .find(|product| product.id == product_id)
            .ok_or_else(|| BillingError::NotFound(format!("product {}", product_id)))?;
        product.default_price = Some(price_id.to_string());
        Ok(product.clone())
    }
}
