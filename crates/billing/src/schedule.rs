//! Subscription schedules
//!
//! A monthly subscription that must run until its annual renewal is migrated
//! onto a schedule: the phase inherited from the subscription is kept as-is and
//! an exhaustion phase bills the remaining months before the schedule cancels.

use std::sync::Arc;

use crate::error::{BillingError, BillingResult};
use crate::platform::ScheduleApi;
use crate::renewal::RenewalWindow;
use crate::resources::{
    EndBehavior, PhaseItemParams, PhaseParams, ScheduleStatus, SubscriptionSchedule,
    UpdateSchedule,
};

/// Build the update that keeps the current phase and appends `remaining_months`
/// monthly iterations of `price_id`, cancelling when the schedule ends.
///
/// No exhaustion phase is added when nothing is left to bill.
pub fn exhaustion_update(
    schedule: &SubscriptionSchedule,
    price_id: &str,
    remaining_months: u32,
) -> BillingResult<UpdateSchedule> {
    let current = schedule.phases.first().ok_or_else(|| {
        BillingError::NotFound(format!("schedule {} has no phases", schedule.id))
    })?;

    let mut phases = vec![PhaseParams::from(current)];
    if remaining_months > 0 {
        phases.push(PhaseParams {
            items: vec![PhaseItemParams {
                price: price_id.to_string(),
                quantity: None,
            }],
            start_date: None,
            end_date: None,
            iterations: Some(remaining_months),
            proration_behavior: None,
        });
    }

    Ok(UpdateSchedule {
        end_behavior: Some(EndBehavior::Cancel),
        phases,
    })
}

pub struct ScheduleService<P: ?Sized> {
    platform: Arc<P>,
}

impl<P: ScheduleApi + ?Sized> ScheduleService<P> {
    pub fn new(platform: Arc<P>) -> Self {
        Self { platform }
    }

    /// Move a subscription onto a schedule that bills through the renewal
    /// window and then cancels.
    ///
    /// Creating from a subscription cannot change anything in the same call,
    /// so the phases are rewritten by a follow-up update.
    pub async fn schedule_cancellation(
        &self,
        subscription_id: &str,
        price_id: &str,
        window: &RenewalWindow,
    ) -> BillingResult<SubscriptionSchedule> {
        let schedule = self
            .platform
            .create_schedule_from_subscription(subscription_id)
            .await?;
        tracing::info!(
            schedule_id = %schedule.id,
            subscription_id = %subscription_id,
            "Subscription migrated to schedule"
        );

        let update = exhaustion_update(&schedule, price_id, window.billable_months())?;
        let schedule = self.platform.update_schedule(&schedule.id, update).await?;

        tracing::info!(
            schedule_id = %schedule.id,
            remaining_months = window.remaining_months,
            annual_renewal_date = %window.annual_renewal_date,
            phases = schedule.phases.len(),
            "Schedule set to cancel at annual renewal"
        );
        Ok(schedule)
    }

    /// Release the schedule, dropping its cancellation date, so the
    /// subscription keeps renewing on its own.
    pub async fn release(&self, schedule_id: &str) -> BillingResult<SubscriptionSchedule> {
        let schedule = self.platform.release_schedule(schedule_id, false).await?;

        if schedule.status != ScheduleStatus::Released {
            tracing::error!(
                schedule_id = %schedule_id,
                status = %schedule.status,
                "Subscription schedule not released"
            );
            return Err(BillingError::ScheduleNotReleased {
                schedule_id: schedule_id.to_string(),
                status: schedule.status.to_string(),
            });
        }

        tracing::info!(schedule_id = %schedule_id, "Subscription schedule released");
        Ok(schedule)
    }

    pub async fn retrieve(&self, schedule_id: &str) -> BillingResult<SubscriptionSchedule> {
        self.platform.retrieve_schedule(schedule_id).await
    }
}
