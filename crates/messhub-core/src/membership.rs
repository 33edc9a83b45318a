//! Membership domain value objects.
//!
//! These are produced by the membership service from validated backend rows
//! and are replaced wholesale on every re-fetch; nothing mutates them in place.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Active,
    Pending,
    Expired,
    Cancelled,
}

impl std::fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MembershipStatus::Active => write!(f, "active"),
            MembershipStatus::Pending => write!(f, "pending"),
            MembershipStatus::Expired => write!(f, "expired"),
            MembershipStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub id: Uuid,
    pub member_id: Uuid,
    pub mess_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub status: MembershipStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Defaults to 0 when the backend row carries `null`.
    pub points_balance: i64,
    pub created_at: Option<DateTime<Utc>>,
}

impl Membership {
    /// Whole days left until `end_date`, or 0 once it has passed.
    #[must_use]
    pub fn days_remaining(&self, today: NaiveDate) -> i64 {
        (self.end_date - today).num_days().max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenewalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl std::fmt::Display for RenewalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenewalStatus::Pending => write!(f, "pending"),
            RenewalStatus::Approved => write!(f, "approved"),
            RenewalStatus::Rejected => write!(f, "rejected"),
            RenewalStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewalRequest {
    pub id: Uuid,
    pub member_id: Uuid,
    pub mess_id: Uuid,
    pub membership_id: Option<Uuid>,
    pub plan_id: Uuid,
    pub status: RenewalStatus,
    /// Defaults to 0 when absent.
    pub points_used: i64,
    /// Defaults to 0 when absent.
    pub amount: Decimal,
    pub notes: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Input for a new renewal request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRenewalRequest {
    pub member_id: Uuid,
    pub mess_id: Uuid,
    pub membership_id: Option<Uuid>,
    pub plan_id: Uuid,
    pub points_used: i64,
    pub amount: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Earned,
    Redeemed,
    Expired,
    Adjusted,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionType::Earned => write!(f, "earned"),
            TransactionType::Redeemed => write!(f, "redeemed"),
            TransactionType::Expired => write!(f, "expired"),
            TransactionType::Adjusted => write!(f, "adjusted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsTransaction {
    pub id: Uuid,
    pub member_id: Uuid,
    pub mess_id: Uuid,
    pub points: i64,
    pub transaction_type: TransactionType,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsBenefit {
    pub available_points: i64,
    pub points_to_use: i64,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EligibilityCode {
    ActiveMembershipExists,
    PendingRequestExists,
    Eligible,
}

impl std::fmt::Display for EligibilityCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EligibilityCode::ActiveMembershipExists => write!(f, "ACTIVE_MEMBERSHIP_EXISTS"),
            EligibilityCode::PendingRequestExists => write!(f, "PENDING_REQUEST_EXISTS"),
            EligibilityCode::Eligible => write!(f, "ELIGIBLE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalEligibility {
    pub is_eligible: bool,
    pub code: EligibilityCode,
    pub message: String,
}

impl RenewalEligibility {
    #[must_use]
    pub fn eligible() -> Self {
        Self {
            is_eligible: true,
            code: EligibilityCode::Eligible,
            message: "You can request a renewal".to_string(),
        }
    }

    #[must_use]
    pub fn active_membership_exists() -> Self {
        Self {
            is_eligible: false,
            code: EligibilityCode::ActiveMembershipExists,
            message: "You already have an active membership".to_string(),
        }
    }

    #[must_use]
    pub fn pending_request_exists() -> Self {
        Self {
            is_eligible: false,
            code: EligibilityCode::PendingRequestExists,
            message: "A renewal request is already pending".to_string(),
        }
    }
}

/// One page of rows plus the exact total when the backend reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: Option<u64>,
}

impl<T> Page<T> {
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&EligibilityCode::ActiveMembershipExists).unwrap();
        assert_eq!(json, "\"ACTIVE_MEMBERSHIP_EXISTS\"");
        assert_eq!(
            EligibilityCode::PendingRequestExists.to_string(),
            "PENDING_REQUEST_EXISTS"
        );
    }

    #[test]
    fn days_remaining_clamps_at_zero() {
        let membership = Membership {
            id: Uuid::nil(),
            member_id: Uuid::nil(),
            mess_id: Uuid::nil(),
            plan_id: None,
            status: MembershipStatus::Expired,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
            points_balance: 0,
            created_at: None,
        };
        let later = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let earlier = NaiveDate::from_ymd_opt(2026, 1, 21).unwrap();
        assert_eq!(membership.days_remaining(later), 0);
        assert_eq!(membership.days_remaining(earlier), 10);
    }

    #[test]
    fn page_map_keeps_total() {
        let page = Page {
            items: vec![1, 2, 3],
            total: Some(30),
        };
        let mapped = page.map(|n| n * 2);
        assert_eq!(mapped.items, vec![2, 4, 6]);
        assert_eq!(mapped.total, Some(30));
    }
}
