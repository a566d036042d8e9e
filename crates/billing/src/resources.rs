//! Platform resources as the simulations see them
//!
//! Only the fields the simulations read are modelled. The live client converts
//! async-stripe's typed resources into these, and the in-memory platform
//! builds them directly. Optional request fields stay `None` so inherited
//! values are never sent back explicitly.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::calendar::from_unix;
use crate::error::{BillingError, BillingResult};

pub type Metadata = HashMap<String, String>;

/// Convert a platform timestamp, failing loudly instead of defaulting.
pub fn timestamp_to_datetime(seconds: i64) -> BillingResult<DateTime<Utc>> {
    from_unix(seconds).ok_or_else(|| BillingError::Timestamp(seconds.to_string()))
}

// =============================================================================
// Test clocks
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestClockStatus {
    Advancing,
    Ready,
    InternalFailure,
}

impl TestClockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestClockStatus::Advancing => "advancing",
            TestClockStatus::Ready => "ready",
            TestClockStatus::InternalFailure => "internal_failure",
        }
    }
}

impl std::fmt::Display for TestClockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestClock {
    pub id: String,
    pub name: Option<String>,
    pub frozen_time: i64,
    pub status: TestClockStatus,
    pub created: i64,
}

impl TestClock {
    pub fn frozen_at(&self) -> BillingResult<DateTime<Utc>> {
        timestamp_to_datetime(self.frozen_time)
    }

    /// Settled at or past `target` and accepting new advances
    pub fn is_ready_at(&self, target: i64) -> bool {
        self.status == TestClockStatus::Ready && self.frozen_time >= target
    }
}

// =============================================================================
// Customers
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub test_clock: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InvoiceSettingsParams {
    pub default_payment_method: String,
}

#[derive(Debug, Clone)]
pub struct CreateCustomer {
    pub name: String,
    pub email: String,
    pub metadata: Option<Metadata>,
    pub test_clock: Option<String>,
    pub payment_method: Option<String>,
    pub invoice_settings: Option<InvoiceSettingsParams>,
}

// =============================================================================
// Subscriptions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionItem {
    pub id: String,
    /// Price id; absent only for legacy plan-based items
    pub price: Option<String>,
    pub quantity: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub customer: String,
    pub status: SubscriptionStatus,
    pub start_date: i64,
    pub current_period_start: i64,
    pub current_period_end: i64,
    pub cancel_at: Option<i64>,
    pub cancel_at_period_end: bool,
    pub items: Vec<SubscriptionItem>,
    pub latest_invoice: Option<String>,
    pub schedule: Option<String>,
}

impl Subscription {
    /// Price of the first (and in these simulations, only) item
    pub fn primary_price_id(&self) -> Option<&str> {
        self.items.first().and_then(|item| item.price.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProrationBehavior {
    AlwaysInvoice,
    CreateProrations,
    None,
}

#[derive(Debug, Clone)]
pub struct CreateSubscriptionItem {
    pub price: String,
}

#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub customer: String,
    pub items: Vec<CreateSubscriptionItem>,
    pub metadata: Option<Metadata>,
    pub proration_behavior: Option<ProrationBehavior>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateSubscription {
    pub cancel_at_period_end: Option<bool>,
    pub cancel_at: Option<i64>,
    pub proration_behavior: Option<ProrationBehavior>,
}

// =============================================================================
// Subscription schedules
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    NotStarted,
    Active,
    Completed,
    Released,
    Canceled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::NotStarted => "not_started",
            ScheduleStatus::Active => "active",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Released => "released",
            ScheduleStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a schedule does with its subscription after the last phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndBehavior {
    Cancel,
    None,
    Release,
    Renew,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseItem {
    pub price: String,
    pub quantity: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePhase {
    pub start_date: i64,
    pub end_date: i64,
    pub items: Vec<PhaseItem>,
    pub proration_behavior: Option<ProrationBehavior>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSchedule {
    pub id: String,
    pub status: ScheduleStatus,
    pub subscription: Option<String>,
    pub end_behavior: EndBehavior,
    pub phases: Vec<SchedulePhase>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseItemParams {
    pub price: String,
    pub quantity: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseParams {
    pub items: Vec<PhaseItemParams>,
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub iterations: Option<u32>,
    pub proration_behavior: Option<ProrationBehavior>,
}

impl From<&SchedulePhase> for PhaseParams {
    /// Carry an existing phase into an update, keeping only what it sets.
    fn from(phase: &SchedulePhase) -> Self {
        Self {
            items: phase
                .items
                .iter()
                .map(|item| PhaseItemParams {
                    price: item.price.clone(),
                    quantity: item.quantity,
                })
                .collect(),
            start_date: Some(phase.start_date),
            end_date: Some(phase.end_date),
            iterations: None,
            proration_behavior: phase.proration_behavior,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSchedule {
    pub end_behavior: Option<EndBehavior>,
    pub phases: Vec<PhaseParams>,
}

// =============================================================================
// Invoices
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub id: String,
    pub status: Option<String>,
    pub paid: Option<bool>,
    pub amount_paid: i64,
    pub subscription: Option<String>,
}

/// Number of invoices the platform reports as paid
pub fn count_paid_invoices(invoices: &[Invoice]) -> usize {
    invoices
        .iter()
        .filter(|invoice| invoice.paid.unwrap_or(false))
        .count()
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurringInterval {
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recurring {
    pub interval: RecurringInterval,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub default_price: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Price {
    pub id: String,
    pub lookup_key: Option<String>,
    pub unit_amount: Option<i64>,
    pub currency: String,
    pub recurring: Option<Recurring>,
    pub product_id: String,
    /// Present when the product was expanded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<Product>,
}

#[derive(Debug, Clone)]
pub struct CreateProduct {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyOption {
    pub unit_amount: i64,
}

#[derive(Debug, Clone)]
pub struct CreatePrice {
    pub product: String,
    pub lookup_key: String,
    pub unit_amount: i64,
    pub currency: String,
    pub currency_options: HashMap<String, CurrencyOption>,
    pub recurring: Recurring,
}
