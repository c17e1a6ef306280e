use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use validator::{Validate, ValidationError};

use crate::errors::ServiceError;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input.validate().map_err(ServiceError::from)
}

/// A required string field, trimmed; absent or blank is `missing_field`.
pub fn required_field(value: Option<String>, name: &str) -> Result<String, ServiceError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ServiceError::validation(
            "missing_field",
            format!("{} is required", name),
        )),
    }
}

/// Minor-unit amount from a JSON number.
///
/// Integers must be non-negative; floats are accepted only when they carry no
/// fractional part and fit in `i64`. Strings and other shapes are rejected.
pub fn parse_amount_minor(value: Option<&Value>) -> Result<i64, ServiceError> {
    let invalid = || {
        ServiceError::validation(
            "invalid_amount",
            "amountMinor must be a non-negative integer",
        )
    };

    let number = match value {
        None | Some(Value::Null) => {
            return Err(ServiceError::validation(
                "missing_field",
                "amountMinor is required",
            ))
        }
        Some(Value::Number(n)) => n,
        Some(_) => return Err(invalid()),
    };

    if let Some(v) = number.as_i64() {
        return if v >= 0 { Ok(v) } else { Err(invalid()) };
    }
    if number.is_u64() {
        return Err(invalid());
    }
    match number.as_f64() {
        Some(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f < i64::MAX as f64 => {
            Ok(f as i64)
        }
        _ => Err(invalid()),
    }
}

/// Validator hook: metadata must be a JSON object when present.
pub fn validate_metadata_object(value: &Value) -> Result<(), ValidationError> {
    if value.is_object() {
        Ok(())
    } else {
        Err(ValidationError::new("metadata_must_be_object"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!(0), 0)]
    #[case(json!(150000), 150000)]
    #[case(json!(150000.0), 150000)]
    fn accepts_whole_non_negative_amounts(#[case] raw: Value, #[case] expected: i64) {
        assert_eq!(parse_amount_minor(Some(&raw)).unwrap(), expected);
    }

    #[rstest]
    #[case(json!(-1))]
    #[case(json!(10.5))]
    #[case(json!(-0.5))]
    #[case(json!("100"))]
    #[case(json!(u64::MAX))]
    #[case(json!(1e300))]
    fn rejects_other_amounts(#[case] raw: Value) {
        assert_matches!(
            parse_amount_minor(Some(&raw)),
            Err(ServiceError::Validation { code: "invalid_amount", .. })
        );
    }

    #[test]
    fn missing_amount_is_a_missing_field() {
        assert_matches!(
            parse_amount_minor(None),
            Err(ServiceError::Validation { code: "missing_field", .. })
        );
        assert_matches!(
            parse_amount_minor(Some(&Value::Null)),
            Err(ServiceError::Validation { code: "missing_field", .. })
        );
    }

    #[test]
    fn blank_required_fields_are_missing() {
        assert_eq!(required_field(Some(" O1 ".into()), "orgId").unwrap(), "O1");
        assert_matches!(
            required_field(Some("  ".into()), "orgId"),
            Err(ServiceError::Validation { code: "missing_field", .. })
        );
    }
}
