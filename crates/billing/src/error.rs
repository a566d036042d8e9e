//! Billing error types

use thiserror::Error;

use crate::renewal::RenewalError;

/// Result alias used across the billing crate
pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Renewal(#[from] RenewalError),

    /// The test clock never settled; carries the last snapshot we saw.
    #[error(
        "Test clock {clock_id} not ready after {attempts} attempts \
         (frozen_time={frozen_time}, status={status}, created={created})"
    )]
    ClockNotReady {
        clock_id: String,
        attempts: u32,
        frozen_time: i64,
        status: String,
        created: i64,
    },

    #[error("Timestamp out of range: {0}")]
    Timestamp(String),

    #[error("No price found for lookup key '{0}'")]
    MissingPrice(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Subscription schedule {schedule_id} not released (status={status})")]
    ScheduleNotReleased { schedule_id: String, status: String },

    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("Invalid webhook payload: {0}")]
    WebhookPayload(String),
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}
