//! Billing platform capabilities
//!
//! Services take the platform as an explicit dependency through these traits
//! so tests can run every simulation against an in-memory fake.

use async_trait::async_trait;

use crate::error::BillingResult;
use crate::resources::{
    CreateCustomer, CreatePrice, CreateProduct, CreateSubscription, Customer, Invoice, Price,
    Product, Subscription, SubscriptionSchedule, TestClock, UpdateSchedule, UpdateSubscription,
};

#[async_trait]
pub trait TestClockApi: Send + Sync {
    async fn create_test_clock(&self, frozen_time: i64, name: &str) -> BillingResult<TestClock>;

    async fn retrieve_test_clock(&self, clock_id: &str) -> BillingResult<TestClock>;

    /// Request an advance; the returned clock is usually still `advancing`.
    async fn advance_test_clock(
        &self,
        clock_id: &str,
        frozen_time: i64,
    ) -> BillingResult<TestClock>;
}

#[async_trait]
pub trait CustomerApi: Send + Sync {
    async fn create_customer(&self, params: CreateCustomer) -> BillingResult<Customer>;
}

#[async_trait]
pub trait SubscriptionApi: Send + Sync {
    async fn create_subscription(&self, params: CreateSubscription) -> BillingResult<Subscription>;

    async fn retrieve_subscription(&self, subscription_id: &str) -> BillingResult<Subscription>;

    async fn update_subscription(
        &self,
        subscription_id: &str,
        params: UpdateSubscription,
    ) -> BillingResult<Subscription>;

    async fn list_invoices(&self, subscription_id: &str, limit: u32) -> BillingResult<Vec<Invoice>>;
}

#[async_trait]
pub trait ScheduleApi: Send + Sync {
    async fn create_schedule_from_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionSchedule>;

    async fn retrieve_schedule(&self, schedule_id: &str) -> BillingResult<SubscriptionSchedule>;

    async fn update_schedule(
        &self,
        schedule_id: &str,
        params: UpdateSchedule,
    ) -> BillingResult<SubscriptionSchedule>;

    async fn release_schedule(
        &self,
        schedule_id: &str,
        preserve_cancel_date: bool,
    ) -> BillingResult<SubscriptionSchedule>;
}

#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn search_products(&self, query: &str) -> BillingResult<Vec<Product>>;

    async fn list_prices_by_lookup_keys(&self, lookup_keys: &[String]) -> BillingResult<Vec<Price>>;

    async fn create_product(&self, params: CreateProduct) -> BillingResult<Product>;

    async fn create_price(&self, params: CreatePrice) -> BillingResult<Price>;

    async fn set_default_price(&self, product_id: &str, price_id: &str) -> BillingResult<Product>;
}

/// Everything a full simulation needs
pub trait BillingPlatform:
    TestClockApi + CustomerApi + SubscriptionApi + ScheduleApi + CatalogApi
{
}

impl<T> BillingPlatform for T where
    T: TestClockApi + CustomerApi + SubscriptionApi + ScheduleApi + CatalogApi
{
}
