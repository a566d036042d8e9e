//! Customer and subscription lifecycle operations

use std::sync::Arc;

use crate::error::{BillingError, BillingResult};
use crate::platform::{CatalogApi, CustomerApi, SubscriptionApi};
use crate::poll::{wait_for_condition, PollConfig, PollOutcome, Sleeper};
use crate::resources::{
    count_paid_invoices, CreateCustomer, CreateSubscription, CreateSubscriptionItem, Customer,
    InvoiceSettingsParams, Metadata, ProrationBehavior, Subscription, SubscriptionStatus,
    UpdateSubscription,
};

/// Test-mode card attached to every simulated customer
pub const TEST_PAYMENT_METHOD: &str = "pm_card_visa";

/// Invoices fetched per subscription when counting payments
pub const INVOICE_PAGE_LIMIT: u32 = 100;

/// Everything needed to subscribe a fresh customer to one price
#[derive(Debug, Clone)]
pub struct SubscriptionSpecs {
    pub price_lookup_key: String,
    pub name: String,
    pub email: String,
    pub metadata: Metadata,
    pub test_clock_id: Option<String>,
    pub proration_behavior: Option<ProrationBehavior>,
}

/// A created customer and its subscription
#[derive(Debug, Clone)]
pub struct CustomerSubscription {
    pub customer: Customer,
    pub subscription: Subscription,
}

pub struct SubscriptionService<P: ?Sized> {
    platform: Arc<P>,
    sleeper: Arc<dyn Sleeper>,
    status_poll: PollConfig,
}

impl<P> SubscriptionService<P>
where
    P: CustomerApi + SubscriptionApi + CatalogApi + ?Sized,
{
    pub fn new(platform: Arc<P>, sleeper: Arc<dyn Sleeper>, status_poll: PollConfig) -> Self {
        Self {
            platform,
            sleeper,
            status_poll,
        }
    }

    /// Create a customer (on the given test clock) and subscribe them to the
    /// price behind `specs.price_lookup_key`.
    pub async fn create_customer_subscription(
        &self,
        specs: SubscriptionSpecs,
    ) -> BillingResult<CustomerSubscription> {
        let prices = self
            .platform
            .list_prices_by_lookup_keys(std::slice::from_ref(&specs.price_lookup_key))
            .await?;
        let price = prices
            .into_iter()
            .find(|price| price.lookup_key.as_deref() == Some(specs.price_lookup_key.as_str()))
            .ok_or_else(|| BillingError::MissingPrice(specs.price_lookup_key.clone()))?;

        let metadata = (!specs.metadata.is_empty()).then_some(specs.metadata);

        let customer = self
            .platform
            .create_customer(CreateCustomer {
                name: specs.name,
                email: specs.email,
                metadata: metadata.clone(),
                test_clock: specs.test_clock_id,
                payment_method: Some(TEST_PAYMENT_METHOD.to_string()),
                invoice_settings: Some(InvoiceSettingsParams {
                    default_payment_method: TEST_PAYMENT_METHOD.to_string(),
                }),
            })
            .await?;

        let subscription = self
            .platform
            .create_subscription(CreateSubscription {
                customer: customer.id.clone(),
                items: vec![CreateSubscriptionItem { price: price.id }],
                metadata,
                proration_behavior: specs.proration_behavior,
            })
            .await?;

        tracing::info!(
            customer_id = %customer.id,
            subscription_id = %subscription.id,
            price_lookup_key = %specs.price_lookup_key,
            status = %subscription.status,
            "Subscription created"
        );

        Ok(CustomerSubscription {
            customer,
            subscription,
        })
    }

    pub async fn retrieve(&self, subscription_id: &str) -> BillingResult<Subscription> {
        self.platform.retrieve_subscription(subscription_id).await
    }

    /// Flag the subscription to end with its current period.
    pub async fn cancel_at_period_end(&self, subscription_id: &str) -> BillingResult<Subscription> {
        tracing::info!(subscription_id = %subscription_id, "Cancelling at period end");
        self.platform
            .update_subscription(
                subscription_id,
                UpdateSubscription {
                    cancel_at_period_end: Some(true),
                    ..Default::default()
                },
            )
            .await
    }

    /// Undo a pending period-end cancellation.
    pub async fn resume(&self, subscription_id: &str) -> BillingResult<Subscription> {
        tracing::info!(subscription_id = %subscription_id, "Resuming subscription");
        self.platform
            .update_subscription(
                subscription_id,
                UpdateSubscription {
                    cancel_at_period_end: Some(false),
                    ..Default::default()
                },
            )
            .await
    }

    /// Schedule the subscription to end at an exact instant (unix seconds).
    pub async fn cancel_at(
        &self,
        subscription_id: &str,
        cancel_at: i64,
    ) -> BillingResult<Subscription> {
        tracing::info!(
            subscription_id = %subscription_id,
            cancel_at = cancel_at,
            "Setting cancel_at"
        );
        self.platform
            .update_subscription(
                subscription_id,
                UpdateSubscription {
                    cancel_at: Some(cancel_at),
                    ..Default::default()
                },
            )
            .await
    }

    /// Poll until the subscription reports `status`.
    ///
    /// Running out of attempts is not an error: the last observed subscription
    /// comes back as `PollOutcome::Exhausted` and a warning is logged.
    pub async fn wait_for_status(
        &self,
        subscription_id: &str,
        status: SubscriptionStatus,
    ) -> BillingResult<PollOutcome<Subscription>> {
        let platform = &self.platform;
        let outcome = wait_for_condition(
            || platform.retrieve_subscription(subscription_id),
            |subscription: &Subscription| subscription.status == status,
            &self.status_poll,
            self.sleeper.as_ref(),
        )
        .await?;

        if let PollOutcome::Exhausted { last, attempts } = &outcome {
            tracing::warn!(
                subscription_id = %subscription_id,
                expected = %status,
                observed = %last.status,
                attempts = *attempts,
                "Subscription did not reach expected status"
            );
        }

        Ok(outcome)
    }

    pub async fn paid_invoice_count(&self, subscription_id: &str) -> BillingResult<usize> {
        let invoices = self
            .platform
            .list_invoices(subscription_id, INVOICE_PAGE_LIMIT)
            .await?;
        Ok(count_paid_invoices(&invoices))
    }
}
