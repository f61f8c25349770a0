//! Bind serde_json values to PostgreSQL parameters and decode rows back to JSON.

use serde_json::{Map, Value};
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgRow, PgTypeInfo, Postgres};
use sqlx::{Column, Database, Row, Type, TypeInfo};

/// A value that can be bound to a PostgreSQL query. Placeholders carry a cast to the
/// column type, so each variant only has to announce its own wire type.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Json(Value),
}

impl PgBindValue {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Bool(b) => PgBindValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PgBindValue::I64(i),
                None => n.as_f64().map(PgBindValue::F64).unwrap_or(PgBindValue::Null),
            },
            Value::String(s) => PgBindValue::String(s.clone()),
            Value::Array(_) | Value::Object(_) => PgBindValue::Json(v.clone()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            PgBindValue::Null => Ok(IsNull::Yes),
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf),
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgBindValue::String(s) => <&str as Encode<Postgres>>::encode_by_ref(&s.as_str(), buf),
            PgBindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null | PgBindValue::String(_) => <String as Type<Postgres>>::type_info(),
            PgBindValue::Bool(_) => <bool as Type<Postgres>>::type_info(),
            PgBindValue::I64(_) => <i64 as Type<Postgres>>::type_info(),
            PgBindValue::F64(_) => <f64 as Type<Postgres>>::type_info(),
            PgBindValue::Json(_) => <Value as Type<Postgres>>::type_info(),
        })
    }
}

impl Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }
}

/// Decode a row into a JSON object keyed by column name.
pub fn row_to_json(row: &PgRow) -> Value {
    let mut map = Map::new();
    for (i, col) in row.columns().iter().enumerate() {
        map.insert(col.name().to_string(), cell_to_value(row, i, col.type_info().name()));
    }
    Value::Object(map)
}

fn cell_to_value(row: &PgRow, i: usize, type_name: &str) -> Value {
    fn get<'r, T>(row: &'r PgRow, i: usize) -> Option<T>
    where
        T: sqlx::Decode<'r, Postgres> + Type<Postgres>,
    {
        row.try_get::<Option<T>, _>(i).ok().flatten()
    }

    let v = match type_name {
        "INT2" => get::<i16>(row, i).map(Value::from),
        "INT4" => get::<i32>(row, i).map(Value::from),
        "INT8" => get::<i64>(row, i).map(Value::from),
        "FLOAT4" => get::<f32>(row, i).and_then(|n| serde_json::Number::from_f64(n as f64)).map(Value::Number),
        "FLOAT8" => get::<f64>(row, i).and_then(serde_json::Number::from_f64).map(Value::Number),
        "BOOL" => get::<bool>(row, i).map(Value::Bool),
        "UUID" => get::<uuid::Uuid>(row, i).map(|u| Value::String(u.to_string())),
        "TIMESTAMPTZ" => get::<chrono::DateTime<chrono::Utc>>(row, i).map(|d| Value::String(d.to_rfc3339())),
        "TIMESTAMP" => get::<chrono::NaiveDateTime>(row, i)
            .map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "DATE" => get::<chrono::NaiveDate>(row, i).map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        "JSON" | "JSONB" => get::<Value>(row, i),
        _ => get::<String>(row, i).map(Value::String),
    };
    v.unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_to_bind_values() {
        assert_eq!(PgBindValue::from_json(&json!(null)), PgBindValue::Null);
        assert_eq!(PgBindValue::from_json(&json!(42)), PgBindValue::I64(42));
        assert_eq!(PgBindValue::from_json(&json!(1.5)), PgBindValue::F64(1.5));
        assert_eq!(PgBindValue::from_json(&json!("x")), PgBindValue::String("x".into()));
        assert_eq!(PgBindValue::from_json(&json!([1])), PgBindValue::Json(json!([1])));
        assert_eq!(PgBindValue::from_json(&json!(true)), PgBindValue::Bool(true));
    }

    #[test]
    fn bind_values_announce_their_wire_type() {
        assert_eq!(PgBindValue::I64(1).produces().unwrap().name(), "INT8");
        assert_eq!(PgBindValue::Bool(true).produces().unwrap().name(), "BOOL");
        assert_eq!(PgBindValue::String("a".into()).produces().unwrap().name(), "TEXT");
        assert_eq!(PgBindValue::Json(json!({})).produces().unwrap().name(), "JSONB");
    }
}
