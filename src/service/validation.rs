//! Payload validation against the introspected column metadata.

use crate::error::AppError;
use crate::schema::{ColumnDef, ColumnType, EntityDefinition};
use serde_json::{Map, Value};

pub struct RequestValidator;

impl RequestValidator {
    /// Validate an insert payload: every required column present, every value fits its column.
    pub fn validate(entity: &EntityDefinition, body: &Map<String, Value>) -> Result<(), AppError> {
        let missing: Vec<&str> = entity
            .columns
            .iter()
            .filter(|c| is_required(entity, c))
            .filter(|c| body.get(&c.name).map(Value::is_null).unwrap_or(true))
            .map(|c| c.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }
        Self::validate_partial(entity, body)
    }

    /// Validate only the fields present in body (for update). Required is not enforced.
    pub fn validate_partial(entity: &EntityDefinition, body: &Map<String, Value>) -> Result<(), AppError> {
        for (name, v) in body {
            if let Some(col) = entity.column(name) {
                validate_field(col, v)?;
            }
        }
        Ok(())
    }
}

/// Non-nullable, no default, and not stamped by the executor.
fn is_required(entity: &EntityDefinition, c: &ColumnDef) -> bool {
    if c.nullable || c.has_default || c.is_auto_increment {
        return false;
    }
    let stamped = [entity.created_column(), entity.updated_column()]
        .into_iter()
        .flatten()
        .any(|t| t.name == c.name);
    !stamped
}

fn validate_field(col: &ColumnDef, v: &Value) -> Result<(), AppError> {
    if v.is_null() {
        if !col.nullable && !col.has_default {
            return Err(AppError::Validation(format!("{} cannot be null", col.name)));
        }
        return Ok(());
    }
    let ok = if let Some((min, max)) = col.column_type.integer_range() {
        match v {
            Value::Number(n) => n.as_i64().is_some_and(|n| (min..=max).contains(&n)),
            Value::String(s) => col.column_type.coerce(s).is_some(),
            _ => false,
        }
    } else {
        match col.column_type {
            ColumnType::Decimal | ColumnType::Float | ColumnType::Double => match v {
                Value::Number(_) => true,
                Value::String(s) => s.trim().parse::<f64>().is_ok(),
                _ => false,
            },
            ColumnType::Boolean => v.is_boolean(),
            _ => true,
        }
    };
    if ok {
        Ok(())
    } else {
        Err(AppError::Validation(format!("{} has an invalid value", col.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::entity::tests::{col, tasks_entity};
    use serde_json::json;

    fn strict_tasks() -> EntityDefinition {
        let mut e = tasks_entity();
        for c in e.columns.iter_mut() {
            if c.name == "name" || c.name == "user_custom_id" || c.name == "createdAt" {
                c.nullable = false;
            }
        }
        e
    }

    #[test]
    fn missing_required_columns_are_listed() {
        let e = strict_tasks();
        let err = RequestValidator::validate(&e, json!({"description": "x"}).as_object().unwrap()).unwrap_err();
        assert_eq!(err.to_string(), "Missing required fields: name, user_custom_id");
    }

    #[test]
    fn defaults_and_timestamps_are_not_required() {
        let e = strict_tasks();
        let body = json!({"name": "run", "user_custom_id": "u-1"});
        assert!(RequestValidator::validate(&e, body.as_object().unwrap()).is_ok());
    }

    #[test]
    fn explicit_null_counts_as_missing() {
        let e = strict_tasks();
        let body = json!({"name": null, "user_custom_id": "u-1"});
        assert!(RequestValidator::validate(&e, body.as_object().unwrap()).is_err());
    }

    #[test]
    fn values_must_fit_the_column() {
        let e = tasks_entity();
        assert!(RequestValidator::validate_partial(&e, json!({"age": "12"}).as_object().unwrap()).is_ok());
        assert!(RequestValidator::validate_partial(&e, json!({"age": "twelve"}).as_object().unwrap()).is_err());
        assert!(RequestValidator::validate_partial(&e, json!({"age": 1.5}).as_object().unwrap()).is_err());
        assert!(RequestValidator::validate_partial(&e, json!({"age": 99999999999i64}).as_object().unwrap()).is_err());
        assert!(RequestValidator::validate_partial(&e, json!({"age": "99999999999"}).as_object().unwrap()).is_err());
        assert!(RequestValidator::validate_partial(&e, json!({"unknown": []}).as_object().unwrap()).is_ok());

        let flags = EntityDefinition::new("public", "flags", vec![col("id", "int4"), col("on", "bool")]);
        assert!(RequestValidator::validate_partial(&flags, json!({"on": "yes"}).as_object().unwrap()).is_err());
        assert!(RequestValidator::validate_partial(&flags, json!({"on": true}).as_object().unwrap()).is_ok());
    }
}
