//! Raw backend rows to domain value objects, and domain input to insert rows.
//!
//! Every conversion validates against a [`Schema`] first, then deserializes
//! the row (ISO dates and timestamps, decimal strings or numbers) and defaults
//! nullable counters to zero.

use chrono::{DateTime, NaiveDate, Utc};
use messhub_core::{
    Membership, MembershipStatus, NewRenewalRequest, PointsBenefit, PointsTransaction,
    RenewalRequest, RenewalStatus, TransactionType,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::validate::{Schema, MEMBERSHIP, POINTS_BENEFIT, POINTS_TRANSACTION, RENEWAL_REQUEST};

#[derive(Deserialize)]
struct MembershipRow {
    id: Uuid,
    member_id: Uuid,
    mess_id: Uuid,
    #[serde(default)]
    plan_id: Option<Uuid>,
    status: MembershipStatus,
    start_date: NaiveDate,
    end_date: NaiveDate,
    #[serde(default)]
    points_balance: Option<i64>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<MembershipRow> for Membership {
    fn from(row: MembershipRow) -> Self {
        Self {
            id: row.id,
            member_id: row.member_id,
            mess_id: row.mess_id,
            plan_id: row.plan_id,
            status: row.status,
            start_date: row.start_date,
            end_date: row.end_date,
            points_balance: row.points_balance.unwrap_or(0),
            created_at: row.created_at,
        }
    }
}

#[derive(Deserialize)]
struct RenewalRequestRow {
    id: Uuid,
    member_id: Uuid,
    mess_id: Uuid,
    #[serde(default)]
    membership_id: Option<Uuid>,
    plan_id: Uuid,
    status: RenewalStatus,
    #[serde(default)]
    points_used: Option<i64>,
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default)]
    notes: Option<String>,
    requested_at: DateTime<Utc>,
    #[serde(default)]
    processed_at: Option<DateTime<Utc>>,
}

impl From<RenewalRequestRow> for RenewalRequest {
    fn from(row: RenewalRequestRow) -> Self {
        Self {
            id: row.id,
            member_id: row.member_id,
            mess_id: row.mess_id,
            membership_id: row.membership_id,
            plan_id: row.plan_id,
            status: row.status,
            points_used: row.points_used.unwrap_or(0),
            amount: row.amount.unwrap_or(Decimal::ZERO),
            notes: row.notes,
            requested_at: row.requested_at,
            processed_at: row.processed_at,
        }
    }
}

#[derive(Deserialize)]
struct PointsTransactionRow {
    id: Uuid,
    member_id: Uuid,
    mess_id: Uuid,
    points: i64,
    transaction_type: TransactionType,
    #[serde(default)]
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<PointsTransactionRow> for PointsTransaction {
    fn from(row: PointsTransactionRow) -> Self {
        Self {
            id: row.id,
            member_id: row.member_id,
            mess_id: row.mess_id,
            points: row.points,
            transaction_type: row.transaction_type,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

#[derive(Deserialize)]
struct PointsBenefitRow {
    available_points: i64,
    points_to_use: i64,
    discount_amount: Decimal,
    final_amount: Decimal,
}

impl From<PointsBenefitRow> for PointsBenefit {
    fn from(row: PointsBenefitRow) -> Self {
        Self {
            available_points: row.available_points,
            points_to_use: row.points_to_use,
            discount_amount: row.discount_amount,
            final_amount: row.final_amount,
        }
    }
}

fn parse<Row, T>(schema: &Schema, raw: Value) -> Result<T, ValidationError>
where
    Row: DeserializeOwned + Into<T>,
{
    schema.check(&raw)?;
    let row: Row = serde_json::from_value(raw).map_err(|source| ValidationError::Malformed {
        entity: schema.entity,
        source,
    })?;
    Ok(row.into())
}

/// # Errors
///
/// Returns [`ValidationError`] if the row is incomplete or malformed.
pub fn membership(raw: Value) -> Result<Membership, ValidationError> {
    parse::<MembershipRow, _>(&MEMBERSHIP, raw)
}

/// # Errors
///
/// Returns [`ValidationError`] if the row is incomplete or malformed.
pub fn renewal_request(raw: Value) -> Result<RenewalRequest, ValidationError> {
    parse::<RenewalRequestRow, _>(&RENEWAL_REQUEST, raw)
}

/// # Errors
///
/// Returns [`ValidationError`] if the row is incomplete or malformed.
pub fn points_transaction(raw: Value) -> Result<PointsTransaction, ValidationError> {
    parse::<PointsTransactionRow, _>(&POINTS_TRANSACTION, raw)
}

/// Set-returning RPCs answer with a one-element array; both shapes are accepted.
///
/// # Errors
///
/// Returns [`ValidationError`] if the result is incomplete or malformed.
pub fn points_benefit(raw: Value) -> Result<PointsBenefit, ValidationError> {
    let raw = match raw {
        Value::Array(rows) => rows.into_iter().next().unwrap_or(Value::Null),
        other => other,
    };
    parse::<PointsBenefitRow, _>(&POINTS_BENEFIT, raw)
}

/// A `null` balance is zero.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidField`] for anything but an integer or null.
pub fn points_balance(raw: &Value) -> Result<i64, ValidationError> {
    match raw {
        Value::Null => Ok(0),
        Value::Number(n) => n.as_i64().ok_or_else(|| ValidationError::InvalidField {
            entity: "points balance",
            field: "balance",
            reason: format!("{n} is not an integer"),
        }),
        other => Err(ValidationError::InvalidField {
            entity: "points balance",
            field: "balance",
            reason: format!("expected a number, got {other}"),
        }),
    }
}

/// Insert payload for a new renewal request; it always starts `pending`.
#[must_use]
pub fn renewal_insert_row(request: &NewRenewalRequest) -> Value {
    json!({
        "member_id": request.member_id,
        "mess_id": request.mess_id,
        "membership_id": request.membership_id,
        "plan_id": request.plan_id,
        "status": RenewalStatus::Pending,
        "points_used": request.points_used,
        "amount": request.amount,
        "notes": request.notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const MEMBER: &str = "11111111-1111-4111-8111-111111111111";
    const MESS: &str = "22222222-2222-4222-8222-222222222222";

    #[test]
    fn membership_nullable_balance_defaults_to_zero() {
        let m = membership(json!({
            "id": "33333333-3333-4333-8333-333333333333",
            "member_id": MEMBER,
            "mess_id": MESS,
            "plan_id": null,
            "status": "active",
            "start_date": "2026-10-01",
            "end_date": "2026-10-31",
            "points_balance": null,
            "created_at": "2026-10-01T06:30:00+00:00"
        }))
        .unwrap();

        assert_eq!(m.points_balance, 0);
        assert_eq!(m.status, MembershipStatus::Active);
        assert_eq!(m.end_date, NaiveDate::from_ymd_opt(2026, 10, 31).unwrap());
        assert!(m.plan_id.is_none());
    }

    #[test]
    fn renewal_request_accepts_numeric_and_missing_amounts() {
        let base = json!({
            "id": "44444444-4444-4444-8444-444444444444",
            "member_id": MEMBER,
            "mess_id": MESS,
            "plan_id": "55555555-5555-4555-8555-555555555555",
            "status": "pending",
            "requested_at": "2026-10-15T12:00:00Z"
        });
        let defaulted = renewal_request(base.clone()).unwrap();
        assert_eq!(defaulted.amount, Decimal::ZERO);
        assert_eq!(defaulted.points_used, 0);

        let mut priced = base;
        priced["amount"] = json!("2450.50");
        priced["points_used"] = json!(120);
        let priced = renewal_request(priced).unwrap();
        assert_eq!(priced.amount, Decimal::from_str("2450.50").unwrap());
        assert_eq!(priced.points_used, 120);
    }

    fn instant(value: &Value) -> DateTime<chrono::FixedOffset> {
        DateTime::parse_from_rfc3339(value.as_str().unwrap()).unwrap()
    }

    fn decimal(value: &Value) -> Decimal {
        Decimal::from_str(value.to_string().trim_matches('"')).unwrap()
    }

    #[test]
    fn renewal_request_maps_back_to_its_source_row() {
        let raw = json!({
            "id": "44444444-4444-4444-8444-444444444444",
            "member_id": MEMBER,
            "mess_id": MESS,
            "membership_id": "33333333-3333-4333-8333-333333333333",
            "plan_id": "55555555-5555-4555-8555-555555555555",
            "status": "approved",
            "amount": "2450.50",
            "notes": "paid at the counter",
            "requested_at": "2026-10-15T17:30:00+05:30",
            "processed_at": "2026-10-16T09:00:00Z"
        });

        let request = renewal_request(raw.clone()).unwrap();
        let back = serde_json::to_value(&request).unwrap();

        for key in ["id", "member_id", "mess_id", "membership_id", "plan_id", "status", "notes"] {
            assert_eq!(back[key], raw[key], "{key}");
        }
        for key in ["requested_at", "processed_at"] {
            assert_eq!(instant(&back[key]), instant(&raw[key]), "{key}");
        }
        assert_eq!(decimal(&back["amount"]), decimal(&raw["amount"]));
        assert_eq!(back["points_used"], 0);
    }

    #[test]
    fn membership_maps_back_to_its_source_row() {
        let raw = json!({
            "id": "33333333-3333-4333-8333-333333333333",
            "member_id": MEMBER,
            "mess_id": MESS,
            "plan_id": "55555555-5555-4555-8555-555555555555",
            "status": "active",
            "start_date": "2026-10-01",
            "end_date": "2026-10-31",
            "created_at": "2026-10-01T06:30:00-04:00"
        });

        let parsed = membership(raw.clone()).unwrap();
        let back = serde_json::to_value(&parsed).unwrap();

        for key in ["id", "member_id", "mess_id", "plan_id", "status", "start_date", "end_date"] {
            assert_eq!(back[key], raw[key], "{key}");
        }
        assert_eq!(instant(&back["created_at"]), instant(&raw["created_at"]));
        assert_eq!(back["points_balance"], 0);
    }

    #[test]
    fn unknown_status_is_malformed() {
        let err = renewal_request(json!({
            "id": "44444444-4444-4444-8444-444444444444",
            "member_id": MEMBER,
            "mess_id": MESS,
            "plan_id": "55555555-5555-4555-8555-555555555555",
            "status": "on_hold",
            "requested_at": "2026-10-15T12:00:00Z"
        }))
        .unwrap_err();
        assert!(matches!(err, ValidationError::Malformed { entity: "renewal request", .. }));
    }

    #[test]
    fn benefit_unwraps_single_row_arrays() {
        let benefit = points_benefit(json!([{
            "available_points": 300,
            "points_to_use": 200,
            "discount_amount": "200.00",
            "final_amount": "2250.50"
        }]))
        .unwrap();
        assert_eq!(benefit.points_to_use, 200);
        assert_eq!(benefit.final_amount, Decimal::from_str("2250.50").unwrap());

        let err = points_benefit(json!([])).unwrap_err();
        assert!(matches!(err, ValidationError::NotAnObject { .. }));
    }

    #[test]
    fn balance_must_be_an_integer() {
        assert_eq!(points_balance(&Value::Null).unwrap(), 0);
        assert_eq!(points_balance(&json!(75)).unwrap(), 75);
        assert!(points_balance(&json!("75")).is_err());
        assert!(points_balance(&json!(7.5)).is_err());
    }

    #[test]
    fn insert_row_starts_pending() {
        let row = renewal_insert_row(&NewRenewalRequest {
            member_id: Uuid::from_str(MEMBER).unwrap(),
            mess_id: Uuid::from_str(MESS).unwrap(),
            membership_id: None,
            plan_id: Uuid::nil(),
            points_used: 0,
            amount: Decimal::new(150_000, 2),
            notes: Some("monthly".to_owned()),
        });
        assert_eq!(row["status"], "pending");
        assert_eq!(row["member_id"], MEMBER);
        assert_eq!(row["amount"], "1500.00");
    }
}
