//! Static pricing configuration
//!
//! Action-type credit costs, purchasable credit packages, and subscription
//! plans. Unknown ids are rejected here, before any order row or balance
//! mutation exists.

use crate::error::{CreditsError, CreditsResult};

/// A paid action type, priced in credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    /// Full UX audit of a page
    Audit,
    /// Audience research report
    Research,
    /// Business analysis report
    Business,
    /// Hypotheses generation
    Hypotheses,
    /// A/B test suggestions
    AbTest,
}

impl ActionType {
    /// Fixed credit cost for the action.
    pub fn credit_cost(self) -> i64 {
        match self {
            ActionType::Audit => 2,
            ActionType::Research
            | ActionType::Business
            | ActionType::Hypotheses
            | ActionType::AbTest => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Audit => "audit",
            ActionType::Research => "research",
            ActionType::Business => "business",
            ActionType::Hypotheses => "hypotheses",
            ActionType::AbTest => "ab_test",
        }
    }

    pub fn parse(tag: &str) -> CreditsResult<Self> {
        match tag {
            "audit" => Ok(ActionType::Audit),
            "research" => Ok(ActionType::Research),
            "business" => Ok(ActionType::Business),
            "hypotheses" => Ok(ActionType::Hypotheses),
            "ab_test" => Ok(ActionType::AbTest),
            other => Err(CreditsError::UnknownActionType(other.to_string())),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purchasable one-time credit package.
#[derive(Debug, Clone, Copy)]
pub struct CreditPackage {
    pub id: &'static str,
    pub credits: i64,
    /// USD price in cents
    pub price_cents: i64,
    pub description: &'static str,
}

/// A subscription plan granting a per-day usage allowance.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionPlan {
    pub id: &'static str,
    pub daily_limit: i64,
    /// Length of one billing period in days
    pub billing_days: i64,
    /// USD price in cents
    pub price_cents: i64,
    pub description: &'static str,
}

pub const CREDIT_PACKAGES: &[CreditPackage] = &[
    CreditPackage {
        id: "starter",
        credits: 20,
        price_cents: 9_00,
        description: "Starter pack, 20 credits",
    },
    CreditPackage {
        id: "growth",
        credits: 50,
        price_cents: 19_00,
        description: "Growth pack, 50 credits",
    },
    CreditPackage {
        id: "agency",
        credits: 200,
        price_cents: 59_00,
        description: "Agency pack, 200 credits",
    },
];

pub const SUBSCRIPTION_PLANS: &[SubscriptionPlan] = &[
    SubscriptionPlan {
        id: "pro_monthly",
        daily_limit: 10,
        billing_days: 30,
        price_cents: 29_00,
        description: "Pro plan, monthly",
    },
    SubscriptionPlan {
        id: "pro_yearly",
        daily_limit: 10,
        billing_days: 365,
        price_cents: 290_00,
        description: "Pro plan, yearly",
    },
];

/// Welcome grant applied when a balance row is created lazily.
pub const DEFAULT_WELCOME_CREDITS: i64 = 3;

/// Look up a credit package, rejecting unknown ids.
pub fn package(id: &str) -> CreditsResult<&'static CreditPackage> {
    CREDIT_PACKAGES
        .iter()
        .find(|p| p.id == id)
        .ok_or_else(|| CreditsError::UnknownPackage(id.to_string()))
}

/// Look up a subscription plan, rejecting unknown ids.
pub fn plan(id: &str) -> CreditsResult<&'static SubscriptionPlan> {
    SUBSCRIPTION_PLANS
        .iter()
        .find(|p| p.id == id)
        .ok_or_else(|| CreditsError::UnknownPlan(id.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn audit_costs_two_others_cost_one() {
        assert_eq!(ActionType::Audit.credit_cost(), 2);
        assert_eq!(ActionType::Research.credit_cost(), 1);
        assert_eq!(ActionType::Business.credit_cost(), 1);
        assert_eq!(ActionType::Hypotheses.credit_cost(), 1);
        assert_eq!(ActionType::AbTest.credit_cost(), 1);
    }

    #[test]
    fn action_tags_round_trip() {
        for tag in ["audit", "research", "business", "hypotheses", "ab_test"] {
            let action = ActionType::parse(tag).unwrap();
            assert_eq!(action.as_str(), tag);
        }
        assert!(matches!(
            ActionType::parse("seo"),
            Err(CreditsError::UnknownActionType(_))
        ));
    }

    #[test]
    fn unknown_ids_rejected() {
        assert!(package("starter").is_ok());
        assert!(matches!(
            package("mega"),
            Err(CreditsError::UnknownPackage(_))
        ));
        assert!(plan("pro_monthly").is_ok());
        assert!(matches!(plan("free"), Err(CreditsError::UnknownPlan(_))));
    }
}
