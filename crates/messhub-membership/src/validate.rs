//! Shape checks applied to raw backend rows before they are transformed.

use serde_json::Value;

use crate::error::ValidationError;

/// Fields a row must carry, non-null, to be accepted as `entity`.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub entity: &'static str,
    pub required: &'static [&'static str],
}

pub const MEMBERSHIP: Schema = Schema {
    entity: "membership",
    required: &["id", "member_id", "mess_id", "status", "start_date", "end_date"],
};

pub const RENEWAL_REQUEST: Schema = Schema {
    entity: "renewal request",
    required: &["id", "member_id", "mess_id", "plan_id", "status", "requested_at"],
};

pub const POINTS_TRANSACTION: Schema = Schema {
    entity: "points transaction",
    required: &[
        "id",
        "member_id",
        "mess_id",
        "points",
        "transaction_type",
        "created_at",
    ],
};

pub const POINTS_BENEFIT: Schema = Schema {
    entity: "points benefit",
    required: &[
        "available_points",
        "points_to_use",
        "discount_amount",
        "final_amount",
    ],
};

impl Schema {
    /// # Errors
    ///
    /// Returns [`ValidationError::NotAnObject`] for non-object rows and
    /// [`ValidationError::MissingField`] for the first absent or null field.
    pub fn check(&self, raw: &Value) -> Result<(), ValidationError> {
        let Some(object) = raw.as_object() else {
            return Err(ValidationError::NotAnObject {
                entity: self.entity,
            });
        };
        for &field in self.required {
            if object.get(field).is_none_or(Value::is_null) {
                return Err(ValidationError::MissingField {
                    entity: self.entity,
                    field,
                });
            }
        }
        Ok(())
    }
}
