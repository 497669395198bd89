//! Subscription daily-limit counter
//!
//! Subscribers get a per-day allowance alongside (not instead of) the credit
//! balance. The counter is keyed by `(user, UTC date)` so it resets at UTC
//! midnight without any scheduled job, and consumption goes through the
//! repository's atomic conditional increment so concurrent requests cannot
//! overshoot the limit.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::CreditsResult;
use crate::repo::{SubscriptionRepository, UsageRepository};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitCheck {
    pub has_subscription: bool,
    pub can_proceed: bool,
    pub daily_limit: i64,
    pub used_today: i64,
    pub remaining: i64,
}

impl LimitCheck {
    fn none() -> Self {
        Self {
            has_subscription: false,
            can_proceed: false,
            daily_limit: 0,
            used_today: 0,
            remaining: 0,
        }
    }
}

pub struct DailyLimitChecker {
    subscriptions: Arc<dyn SubscriptionRepository>,
    usage: Arc<dyn UsageRepository>,
}

impl DailyLimitChecker {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        usage: Arc<dyn UsageRepository>,
    ) -> Self {
        Self {
            subscriptions,
            usage,
        }
    }

    /// Read-only view of today's allowance. Does not consume.
    pub async fn check(&self, user_id: Uuid) -> CreditsResult<LimitCheck> {
        let Some(sub) = self.subscriptions.find_current(user_id).await? else {
            return Ok(LimitCheck::none());
        };

        let today = OffsetDateTime::now_utc().date();
        let used = self.usage.used_on(user_id, today).await?;
        let remaining = (sub.daily_limit - used).max(0);

        Ok(LimitCheck {
            has_subscription: true,
            can_proceed: remaining > 0,
            daily_limit: sub.daily_limit,
            used_today: used,
            remaining,
        })
    }

    /// Consume one unit of today's allowance. The increment and the limit
    /// check are one storage operation.
    pub async fn consume(&self, user_id: Uuid) -> CreditsResult<LimitCheck> {
        let Some(sub) = self.subscriptions.find_current(user_id).await? else {
            return Ok(LimitCheck::none());
        };

        let today = OffsetDateTime::now_utc().date();
        match self
            .usage
            .try_increment(user_id, today, sub.daily_limit)
            .await?
        {
            Some(used) => Ok(LimitCheck {
                has_subscription: true,
                can_proceed: true,
                daily_limit: sub.daily_limit,
                used_today: used,
                remaining: (sub.daily_limit - used).max(0),
            }),
            None => {
                let used = self.usage.used_on(user_id, today).await?;
                Ok(LimitCheck {
                    has_subscription: true,
                    can_proceed: false,
                    daily_limit: sub.daily_limit,
                    used_today: used,
                    remaining: 0,
                })
            }
        }
    }
}
