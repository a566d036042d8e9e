//! Stripe API client
//!
//! Wraps `stripe::Client` and implements the platform capabilities with
//! async-stripe's typed resources, converting each response into the crate's
//! lean resource types. Releasing a subscription schedule has no typed call in
//! async-stripe, so that one request goes through `post_form`.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use stripe::generated::billing::{
    subscription::SubscriptionProrationBehavior as SubscriptionProration,
    subscription_schedule::SubscriptionProrationBehavior as PhaseProration,
};
use stripe::{Expandable, ParseIdError};

use crate::config::StripeConfig;
use crate::error::{BillingError, BillingResult};
use crate::platform::{CatalogApi, CustomerApi, ScheduleApi, SubscriptionApi, TestClockApi};
use crate::resources::{
    CreateCustomer, CreatePrice, CreateProduct, CreateSubscription, Customer, EndBehavior,
    Invoice, PhaseItem, PhaseParams, Price, Product, ProrationBehavior, Recurring,
    RecurringInterval, ScheduleStatus, SchedulePhase, Subscription, SubscriptionItem,
    SubscriptionSchedule, SubscriptionStatus, TestClock, TestClockStatus, UpdateSchedule,
    UpdateSubscription,
};

/// Stripe client wrapper
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client, pointed at `api_base` when one is set
    pub fn new(config: StripeConfig) -> Self {
        let inner = match config.api_base.as_deref() {
            Some(base) => stripe::Client::from_url(base, config.secret_key.clone()),
            None => stripe::Client::new(config.secret_key.clone()),
        };
        Self { inner, config }
    }

    /// Create from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    /// Get the underlying Stripe client
    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.config.api_base)
            .finish_non_exhaustive()
    }
}

fn parse_id<T>(kind: &str, id: &str) -> BillingResult<T>
where
    T: FromStr<Err = ParseIdError>,
{
    id.parse::<T>()
        .map_err(|e| BillingError::StripeApi(format!("Invalid {} ID: {}", kind, e)))
}

fn missing(resource: &str, id: &str, field: &str) -> BillingError {
    BillingError::StripeApi(format!("{} {} has no {}", resource, id, field))
}

// =============================================================================
// Responses
// =============================================================================

fn test_clock_from(clock: stripe::TestHelpersTestClock) -> BillingResult<TestClock> {
    let id = clock.id.to_string();
    let frozen_time = clock
        .frozen_time
        .ok_or_else(|| missing("test clock", &id, "frozen_time"))?;
    let status = match clock.status {
        Some(stripe::TestHelpersTestClockStatus::Advancing) => TestClockStatus::Advancing,
        Some(stripe::TestHelpersTestClockStatus::Ready) => TestClockStatus::Ready,
        Some(stripe::TestHelpersTestClockStatus::InternalFailure) => {
            TestClockStatus::InternalFailure
        }
        None => return Err(missing("test clock", &id, "status")),
    };

    Ok(TestClock {
        id,
        name: clock.name,
        frozen_time,
        status,
        created: clock.created.unwrap_or_default(),
    })
}

fn customer_from(customer: stripe::Customer) -> Customer {
    Customer {
        id: customer.id.to_string(),
        email: customer.email,
        name: customer.name,
        test_clock: customer.test_clock.map(|clock| clock.id().to_string()),
    }
}

fn subscription_status_from(status: stripe::SubscriptionStatus) -> SubscriptionStatus {
    match status {
        stripe::SubscriptionStatus::Active => SubscriptionStatus::Active,
        stripe::SubscriptionStatus::Canceled => SubscriptionStatus::Canceled,
        stripe::SubscriptionStatus::Incomplete => SubscriptionStatus::Incomplete,
        stripe::SubscriptionStatus::IncompleteExpired => SubscriptionStatus::IncompleteExpired,
        stripe::SubscriptionStatus::PastDue => SubscriptionStatus::PastDue,
        stripe::SubscriptionStatus::Paused => SubscriptionStatus::Paused,
        stripe::SubscriptionStatus::Trialing => SubscriptionStatus::Trialing,
        stripe::SubscriptionStatus::Unpaid => SubscriptionStatus::Unpaid,
    }
}

fn subscription_from(subscription: stripe::Subscription) -> Subscription {
    Subscription {
        id: subscription.id.to_string(),
        customer: subscription.customer.id().to_string(),
        status: subscription_status_from(subscription.status),
        start_date: subscription.start_date,
        current_period_start: subscription.current_period_start,
        current_period_end: subscription.current_period_end,
        cancel_at: subscription.cancel_at,
        cancel_at_period_end: subscription.cancel_at_period_end,
        items: subscription
            .items
            .data
            .into_iter()
            .map(|item| SubscriptionItem {
                id: item.id.to_string(),
                price: item.price.map(|price| price.id.to_string()),
                quantity: item.quantity,
            })
            .collect(),
        latest_invoice: subscription
            .latest_invoice
            .map(|invoice| invoice.id().to_string()),
        schedule: subscription
            .schedule
            .map(|schedule| schedule.id().to_string()),
    }
}

fn invoice_from(invoice: stripe::Invoice) -> Invoice {
    Invoice {
        id: invoice.id.to_string(),
        status: invoice.status.map(|status| status.as_str().to_string()),
        paid: invoice.paid,
        amount_paid: invoice.amount_paid.unwrap_or_default(),
        subscription: invoice
            .subscription
            .map(|subscription| subscription.id().to_string()),
    }
}

fn proration_from(behavior: PhaseProration) -> ProrationBehavior {
    match behavior {
        PhaseProration::AlwaysInvoice => ProrationBehavior::AlwaysInvoice,
        PhaseProration::CreateProrations => ProrationBehavior::CreateProrations,
        PhaseProration::None => ProrationBehavior::None,
    }
}

fn schedule_from(schedule: stripe::SubscriptionSchedule) -> SubscriptionSchedule {
    let status = match schedule.status {
        stripe::SubscriptionScheduleStatus::Active => ScheduleStatus::Active,
        stripe::SubscriptionScheduleStatus::Canceled => ScheduleStatus::Canceled,
        stripe::SubscriptionScheduleStatus::Completed => ScheduleStatus::Completed,
        stripe::SubscriptionScheduleStatus::NotStarted => ScheduleStatus::NotStarted,
        stripe::SubscriptionScheduleStatus::Released => ScheduleStatus::Released,
    };
    let end_behavior = match schedule.end_behavior {
        stripe::SubscriptionScheduleEndBehavior::Cancel => EndBehavior::Cancel,
        stripe::SubscriptionScheduleEndBehavior::None => EndBehavior::None,
        stripe::SubscriptionScheduleEndBehavior::Release => EndBehavior::Release,
        stripe::SubscriptionScheduleEndBehavior::Renew => EndBehavior::Renew,
    };

    SubscriptionSchedule {
        id: schedule.id.to_string(),
        status,
        subscription: schedule
            .subscription
            .map(|subscription| subscription.id().to_string()),
        end_behavior,
        phases: schedule
            .phases
            .into_iter()
            .map(|phase| SchedulePhase {
                start_date: phase.start_date,
                end_date: phase.end_date,
                items: phase
                    .items
                    .into_iter()
                    .map(|item| PhaseItem {
                        price: item.price.id().to_string(),
                        quantity: item.quantity,
                    })
                    .collect(),
                proration_behavior: Some(proration_from(phase.proration_behavior)),
            })
            .collect(),
    }
}

fn product_from(product: stripe::Product) -> Product {
    Product {
        id: product.id.to_string(),
        name: product.name.unwrap_or_default(),
        description: product.description,
        default_price: product.default_price.map(|price| price.id().to_string()),
    }
}

fn price_from(price: stripe::Price) -> BillingResult<Price> {
    let id = price.id.to_string();
    let (product_id, product) = match price.product {
        Some(Expandable::Id(product_id)) => (product_id.to_string(), None),
        Some(Expandable::Object(product)) => {
            let product = product_from(*product);
            (product.id.clone(), Some(product))
        }
        None => return Err(missing("price", &id, "product")),
    };
    let recurring = price.recurring.map(|recurring| Recurring {
        interval: match recurring.interval {
            stripe::RecurringInterval::Day => RecurringInterval::Day,
            stripe::RecurringInterval::Week => RecurringInterval::Week,
            stripe::RecurringInterval::Month => RecurringInterval::Month,
            stripe::RecurringInterval::Year => RecurringInterval::Year,
        },
    });

    Ok(Price {
        id,
        lookup_key: price.lookup_key,
        unit_amount: price.unit_amount,
        currency: price
            .currency
            .map(|currency| currency.to_string())
            .unwrap_or_default(),
        recurring,
        product_id,
        product,
    })
}

// =============================================================================
// Requests
// =============================================================================

fn subscription_proration(behavior: ProrationBehavior) -> SubscriptionProration {
    match behavior {
        ProrationBehavior::AlwaysInvoice => SubscriptionProration::AlwaysInvoice,
        ProrationBehavior::CreateProrations => SubscriptionProration::CreateProrations,
        ProrationBehavior::None => SubscriptionProration::None,
    }
}

fn phase_proration(behavior: ProrationBehavior) -> PhaseProration {
    match behavior {
        ProrationBehavior::AlwaysInvoice => PhaseProration::AlwaysInvoice,
        ProrationBehavior::CreateProrations => PhaseProration::CreateProrations,
        ProrationBehavior::None => PhaseProration::None,
    }
}

fn end_behavior_param(behavior: EndBehavior) -> stripe::SubscriptionScheduleEndBehavior {
    match behavior {
        EndBehavior::Cancel => stripe::SubscriptionScheduleEndBehavior::Cancel,
        EndBehavior::None => stripe::SubscriptionScheduleEndBehavior::None,
        EndBehavior::Release => stripe::SubscriptionScheduleEndBehavior::Release,
        EndBehavior::Renew => stripe::SubscriptionScheduleEndBehavior::Renew,
    }
}

/// Phase update; unset fields stay off the wire.
fn phase_param(phase: &PhaseParams) -> stripe::UpdateSubscriptionSchedulePhases {
    stripe::UpdateSubscriptionSchedulePhases {
        items: phase
            .items
            .iter()
            .map(|item| stripe::UpdateSubscriptionSchedulePhasesItems {
                price: Some(item.price.clone()),
                quantity: item.quantity,
                ..Default::default()
            })
            .collect(),
        start_date: phase.start_date.map(stripe::Scheduled::at),
        end_date: phase.end_date.map(stripe::Scheduled::at),
        iterations: phase.iterations.map(i64::from),
        proration_behavior: phase.proration_behavior.map(phase_proration),
        ..Default::default()
    }
}

fn parse_currency(code: &str) -> BillingResult<stripe::Currency> {
    code.parse()
        .map_err(|e| BillingError::StripeApi(format!("Invalid currency '{}': {}", code, e)))
}

fn recurring_param(recurring: &Recurring) -> stripe::CreatePriceRecurring {
    let interval = match recurring.interval {
        RecurringInterval::Day => stripe::CreatePriceRecurringInterval::Day,
        RecurringInterval::Week => stripe::CreatePriceRecurringInterval::Week,
        RecurringInterval::Month => stripe::CreatePriceRecurringInterval::Month,
        RecurringInterval::Year => stripe::CreatePriceRecurringInterval::Year,
    };
    stripe::CreatePriceRecurring {
        interval,
        ..Default::default()
    }
}

/// `POST /subscription_schedules/{id}/release` body
#[derive(Debug, Serialize)]
struct ReleaseSchedule {
    preserve_cancel_date: bool,
}

#[async_trait]
impl TestClockApi for StripeClient {
    async fn create_test_clock(&self, frozen_time: i64, name: &str) -> BillingResult<TestClock> {
        let params = stripe::CreateTestClock { frozen_time, name };
        let clock = stripe::TestHelpersTestClock::create(&self.inner, &params).await?;

        tracing::debug!(clock_id = %clock.id, frozen_time = frozen_time, "Created test clock");
        test_clock_from(clock)
    }

    async fn retrieve_test_clock(&self, clock_id: &str) -> BillingResult<TestClock> {
        let id = parse_id("test clock", clock_id)?;
        let clock = stripe::TestHelpersTestClock::retrieve(&self.inner, &id).await?;
        test_clock_from(clock)
    }

    async fn advance_test_clock(
        &self,
        clock_id: &str,
        frozen_time: i64,
    ) -> BillingResult<TestClock> {
        let id = parse_id("test clock", clock_id)?;
        let params = stripe::AdvanceTestClock { frozen_time };
        let clock = stripe::TestHelpersTestClock::advance(&self.inner, &id, &params).await?;
        test_clock_from(clock)
    }
}

#[async_trait]
impl CustomerApi for StripeClient {
    async fn create_customer(&self, params: CreateCustomer) -> BillingResult<Customer> {
        let payment_method = params
            .payment_method
            .as_deref()
            .map(|id| parse_id::<stripe::PaymentMethodId>("payment method", id))
            .transpose()?;

        let create = stripe::CreateCustomer {
            name: Some(params.name.as_str()),
            email: Some(params.email.as_str()),
            metadata: params.metadata.clone(),
            test_clock: params.test_clock.as_deref(),
            payment_method,
            invoice_settings: params.invoice_settings.as_ref().map(|settings| {
                stripe::CustomerInvoiceSettings {
                    default_payment_method: Some(settings.default_payment_method.clone()),
                    ..Default::default()
                }
            }),
            ..Default::default()
        };

        let customer = stripe::Customer::create(&self.inner, create).await?;
        Ok(customer_from(customer))
    }
}

#[async_trait]
impl SubscriptionApi for StripeClient {
    async fn create_subscription(&self, params: CreateSubscription) -> BillingResult<Subscription> {
        let customer_id = parse_id::<stripe::CustomerId>("customer", &params.customer)?;

        let mut create = stripe::CreateSubscription::new(customer_id);
        create.items = Some(
            params
                .items
                .iter()
                .map(|item| stripe::CreateSubscriptionItems {
                    price: Some(item.price.clone()),
                    ..Default::default()
                })
                .collect(),
        );
        create.metadata = params.metadata;
        create.proration_behavior = params.proration_behavior.map(subscription_proration);

        let subscription = stripe::Subscription::create(&self.inner, create).await?;
        Ok(subscription_from(subscription))
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> BillingResult<Subscription> {
        let id = parse_id::<stripe::SubscriptionId>("subscription", subscription_id)?;
        let subscription = stripe::Subscription::retrieve(&self.inner, &id, &[]).await?;
        Ok(subscription_from(subscription))
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        params: UpdateSubscription,
    ) -> BillingResult<Subscription> {
        let id = parse_id::<stripe::SubscriptionId>("subscription", subscription_id)?;
        let update = stripe::UpdateSubscription {
            cancel_at: params.cancel_at,
            cancel_at_period_end: params.cancel_at_period_end,
            proration_behavior: params.proration_behavior.map(subscription_proration),
            ..Default::default()
        };

        let subscription = stripe::Subscription::update(&self.inner, &id, update).await?;
        Ok(subscription_from(subscription))
    }

    async fn list_invoices(
        &self,
        subscription_id: &str,
        limit: u32,
    ) -> BillingResult<Vec<Invoice>> {
        let id = parse_id::<stripe::SubscriptionId>("subscription", subscription_id)?;
        let params = stripe::ListInvoices {
            subscription: Some(id),
            limit: Some(u64::from(limit)),
            ..Default::default()
        };

        let page = stripe::Invoice::list(&self.inner, &params).await?;
        Ok(page.data.into_iter().map(invoice_from).collect())
    }
}

#[async_trait]
impl ScheduleApi for StripeClient {
    async fn create_schedule_from_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<SubscriptionSchedule> {
        let create = stripe::CreateSubscriptionSchedule {
            from_subscription: Some(subscription_id),
            ..Default::default()
        };
        let schedule = stripe::SubscriptionSchedule::create(&self.inner, create).await?;
        Ok(schedule_from(schedule))
    }

    async fn retrieve_schedule(&self, schedule_id: &str) -> BillingResult<SubscriptionSchedule> {
        let id = parse_id::<stripe::SubscriptionScheduleId>("subscription schedule", schedule_id)?;
        let schedule = stripe::SubscriptionSchedule::retrieve(&self.inner, &id, &[]).await?;
        Ok(schedule_from(schedule))
    }

    async fn update_schedule(
        &self,
        schedule_id: &str,
        params: UpdateSchedule,
    ) -> BillingResult<SubscriptionSchedule> {
        let id = parse_id::<stripe::SubscriptionScheduleId>("subscription schedule", schedule_id)?;
        let update = stripe::UpdateSubscriptionSchedule {
            end_behavior: params.end_behavior.map(end_behavior_param),
            phases: Some(params.phases.iter().map(phase_param).collect()),
            ..Default::default()
        };

        let schedule = stripe::SubscriptionSchedule::update(&self.inner, &id, update).await?;
        Ok(schedule_from(schedule))
    }

    async fn release_schedule(
        &self,
        schedule_id: &str,
        preserve_cancel_date: bool,
    ) -> BillingResult<SubscriptionSchedule> {
        let id = parse_id::<stripe::SubscriptionScheduleId>("subscription schedule", schedule_id)?;
        let schedule: stripe::SubscriptionSchedule = self
            .inner
            .post_form(
                &format!("/subscription_schedules/{}/release", id),
                ReleaseSchedule {
                    preserve_cancel_date,
                },
            )
            .await?;
        Ok(schedule_from(schedule))
    }
}

#[async_trait]
impl CatalogApi for StripeClient {
    async fn search_products(&self, query: &str) -> BillingResult<Vec<Product>> {
        let params = stripe::ProductSearchParams {
            query: query.to_string(),
            ..stripe::ProductSearchParams::new()
        };
        let page = stripe::Product::search(&self.inner, params).await?;
        Ok(page.data.into_iter().map(product_from).collect())
    }

    async fn list_prices_by_lookup_keys(
        &self,
        lookup_keys: &[String],
    ) -> BillingResult<Vec<Price>> {
        let params = stripe::ListPrices {
            lookup_keys: Some(lookup_keys.to_vec()),
            expand: &["data.product"],
            ..Default::default()
        };
        let page = stripe::Price::list(&self.inner, &params).await?;
        page.data.into_iter().map(price_from).collect()
    }

    async fn create_product(&self, params: CreateProduct) -> BillingResult<Product> {
        let mut create = stripe::CreateProduct::new(&params.name);
        create.description = Some(params.description.as_str());

        let product = stripe::Product::create(&self.inner, create).await?;
        Ok(product_from(product))
    }

    async fn create_price(&self, params: CreatePrice) -> BillingResult<Price> {
        let currency_options = params
            .currency_options
            .iter()
            .map(|(code, option)| {
                let options = stripe::CreatePriceCurrencyOptions {
                    unit_amount: Some(option.unit_amount),
                    ..Default::default()
                };
                Ok((parse_currency(code)?, options))
            })
            .collect::<BillingResult<HashMap<_, _>>>()?;

        let mut create = stripe::CreatePrice::new(parse_currency(&params.currency)?);
        create.product = Some(stripe::IdOrCreate::Id(params.product.as_str()));
        create.lookup_key = Some(params.lookup_key.as_str());
        create.unit_amount = Some(params.unit_amount);
        create.currency_options = Some(currency_options);
        create.recurring = Some(recurring_param(&params.recurring));

        let price = stripe::Price::create(&self.inner, create).await?;
        price_from(price)
    }

    async fn set_default_price(&self, product_id: &str, price_id: &str) -> BillingResult<Product> {
        let id = parse_id::<stripe::ProductId>("product", product_id)?;
        let update = stripe::UpdateProduct {
            default_price: Some(price_id),
            ..Default::default()
        };

        let product = stripe::Product::update(&self.inner, &id, update).await?;
        Ok(product_from(product))
    }
}
