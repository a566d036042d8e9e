// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError::ClockNotReady carries the last clock snapshot
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! billclock Billing Module
//!
//! Drives Stripe subscriptions through cancel and resume flows on test clocks.
//!
//! ## Features
//!
//! - **Renewal Calculator**: Months left between a cancellation request and the annual renewal
//! - **Convergence Polling**: Bounded waits for test clocks and subscription status
//! - **Clock Advancement**: Long jumps split into steps the platform accepts
//! - **Schedules**: Bill the remaining months through a subscription schedule, then cancel
//! - **Demo Catalog**: Idempotent creation of the demo products and prices
//! - **Webhooks**: Signature verification and event classification

pub mod calendar;
pub mod catalog;
pub mod client;
pub mod clock;
pub mod config;
pub mod demo;
pub mod error;
pub mod platform;
pub mod poll;
pub mod renewal;
pub mod resources;
pub mod schedule;
pub mod subscription;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod testing;

// Calendar
pub use calendar::{ClockInterval, ClockOffset};

// Catalog
pub use catalog::{CatalogService, DemoCatalog, DEMO_PRICE_LOOKUP_KEYS, DEMO_PRODUCTS};

// Client
pub use client::StripeClient;

// Clock
pub use clock::ClockService;

// Config
pub use config::{SimulationSettings, StripeConfig, WebhookConfig};

// Demo
pub use demo::{generate_run_id, Demo, DemoOutcome, DemoReport, DemoRunner};

// Error
pub use error::{BillingError, BillingResult};

// Platform
pub use platform::{
    BillingPlatform, CatalogApi, CustomerApi, ScheduleApi, SubscriptionApi, TestClockApi,
};

// Poll
pub use poll::{wait_for_condition, PollConfig, PollOutcome, Sleeper, TokioSleeper};

// Renewal
pub use renewal::{calculate_remaining_months, RenewalError, RenewalWindow};

// Schedule
pub use schedule::ScheduleService;

// Subscription
pub use subscription::{SubscriptionService, SubscriptionSpecs};

// Webhooks
pub use webhooks::{log_event, EventDisposition, WebhookEvent, WebhookVerifier};
