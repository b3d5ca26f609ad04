//! PostgreSQL binding and row decoding for JSON values.
//!
//! [`PgParam`] binds a [`Value`] against whatever parameter type the server
//! inferred for its `$n` slot, and [`PgColumn`] decodes any supported column
//! back into a [`Value`]. [`record_from_row`] turns a whole row into a
//! [`Record`] keyed by column name.

use crate::error::{OrmError, OrmResult};
use crate::value::{Record, Value, kind_name};
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::error::Error;
use std::str::FromStr;
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type};

type BoxError = Box<dyn Error + Sync + Send>;

const NAIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// A borrowed JSON value bound as a statement parameter.
#[derive(Debug)]
pub struct PgParam<'a>(pub &'a Value);

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => {
                if !<bool as ToSql>::accepts(ty) {
                    return Err(mismatch(self.0, ty));
                }
                b.to_sql(ty, out)
            }
            Value::Number(n) => number_to_sql(n, ty, out),
            Value::String(s) => string_to_sql(s, ty, out),
            Value::Array(items) => {
                if is_json(ty) {
                    return self.0.to_sql(ty, out);
                }
                if !matches!(ty.kind(), Kind::Array(_)) {
                    return Err(mismatch(self.0, ty));
                }
                let params: Vec<PgParam<'_>> = items.iter().map(PgParam).collect();
                params.to_sql(ty, out)
            }
            Value::Object(_) => {
                if !is_json(ty) {
                    return Err(mismatch(self.0, ty));
                }
                self.0.to_sql(ty, out)
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    tokio_postgres::types::to_sql_checked!();
}

fn is_json(ty: &Type) -> bool {
    matches!(*ty, Type::JSON | Type::JSONB)
}

fn mismatch(value: &Value, ty: &Type) -> BoxError {
    format!("cannot bind {} value as {}", kind_name(value), ty).into()
}

fn number_to_sql(n: &serde_json::Number, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    let not_integral = || format!("{} is not an integer (column type {})", n, ty);
    match *ty {
        Type::INT2 => {
            let v = n.as_i64().ok_or_else(not_integral)?;
            i16::try_from(v)?.to_sql(ty, out)
        }
        Type::INT4 => {
            let v = n.as_i64().ok_or_else(not_integral)?;
            i32::try_from(v)?.to_sql(ty, out)
        }
        Type::INT8 => n.as_i64().ok_or_else(not_integral)?.to_sql(ty, out),
        Type::OID => {
            let v = n.as_i64().ok_or_else(not_integral)?;
            u32::try_from(v)?.to_sql(ty, out)
        }
        Type::FLOAT4 => {
            let v = n.as_f64().ok_or_else(|| format!("{} is not representable as real", n))?;
            (v as f32).to_sql(ty, out)
        }
        Type::FLOAT8 => n
            .as_f64()
            .ok_or_else(|| format!("{} is not representable as double precision", n))?
            .to_sql(ty, out),
        Type::NUMERIC => parse_decimal(&n.to_string())?.to_sql(ty, out),
        Type::JSON | Type::JSONB => Value::Number(n.clone()).to_sql(ty, out),
        _ if <&str as ToSql>::accepts(ty) => n.to_string().as_str().to_sql(ty, out),
        _ => Err(format!("cannot bind number {} as {}", n, ty).into()),
    }
}

fn string_to_sql(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::UUID => uuid::Uuid::parse_str(s)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => DateTime::parse_from_rfc3339(s)?
            .with_timezone(&Utc)
            .to_sql(ty, out),
        Type::TIMESTAMP => parse_naive_timestamp(s)?.to_sql(ty, out),
        Type::DATE => NaiveDate::parse_from_str(s, "%Y-%m-%d")?.to_sql(ty, out),
        Type::TIME => NaiveTime::parse_from_str(s, "%H:%M:%S%.f")?.to_sql(ty, out),
        Type::INT2 => s.parse::<i16>()?.to_sql(ty, out),
        Type::INT4 => s.parse::<i32>()?.to_sql(ty, out),
        Type::INT8 => s.parse::<i64>()?.to_sql(ty, out),
        Type::FLOAT4 => s.parse::<f32>()?.to_sql(ty, out),
        Type::FLOAT8 => s.parse::<f64>()?.to_sql(ty, out),
        Type::NUMERIC => parse_decimal(s.trim())?.to_sql(ty, out),
        Type::JSON | Type::JSONB => Value::String(s.to_string()).to_sql(ty, out),
        _ if <&str as ToSql>::accepts(ty) => s.to_sql(ty, out),
        _ => Err(format!("cannot bind string as {}", ty).into()),
    }
}

// Large or tiny floats print in exponent form.
fn parse_decimal(s: &str) -> Result<Decimal, rust_decimal::Error> {
    Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s))
}

fn parse_naive_timestamp(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, NAIVE_TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
}

/// A single column decoded into a JSON value.
#[derive(Debug, Clone, PartialEq)]
pub struct PgColumn(pub Value);

impl<'a> FromSql<'a> for PgColumn {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let value = match *ty {
            Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => Value::from(i16::from_sql(ty, raw)?),
            Type::INT4 => Value::from(i32::from_sql(ty, raw)?),
            Type::INT8 => Value::from(i64::from_sql(ty, raw)?),
            Type::OID => Value::from(u32::from_sql(ty, raw)?),
            Type::FLOAT4 => float_value(f64::from(f32::from_sql(ty, raw)?)),
            Type::FLOAT8 => float_value(f64::from_sql(ty, raw)?),
            Type::NUMERIC => numeric_value(Decimal::from_sql(ty, raw)?),
            Type::JSON | Type::JSONB => Value::from_sql(ty, raw)?,
            Type::UUID => Value::String(uuid::Uuid::from_sql(ty, raw)?.to_string()),
            Type::TIMESTAMPTZ => Value::String(DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339()),
            Type::TIMESTAMP => Value::String(
                NaiveDateTime::from_sql(ty, raw)?
                    .format(NAIVE_TIMESTAMP_FORMAT)
                    .to_string(),
            ),
            Type::DATE => Value::String(NaiveDate::from_sql(ty, raw)?.to_string()),
            Type::TIME => Value::String(NaiveTime::from_sql(ty, raw)?.to_string()),
            _ => match ty.kind() {
                Kind::Array(_) => {
                    let items = Vec::<PgColumn>::from_sql(ty, raw)?;
                    Value::Array(items.into_iter().map(|c| c.0).collect())
                }
                _ if <&str as FromSql>::accepts(ty) => {
                    Value::String(<&str as FromSql>::from_sql(ty, raw)?.to_string())
                }
                _ => return Err(format!("unsupported column type {}", ty).into()),
            },
        };
        Ok(PgColumn(value))
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(PgColumn(Value::Null))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

// NaN and infinities have no JSON form.
fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// A NUMERIC becomes a JSON number when that number reads back as the same
/// decimal, otherwise its exact text.
fn numeric_value(d: Decimal) -> Value {
    let text = d.normalize().to_string();
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    let exact = text
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .filter(|n| parse_decimal(&n.to_string()).is_ok_and(|back| back == d));
    match exact {
        Some(n) => Value::Number(n),
        None => Value::String(text),
    }
}

/// Decode every column of a row into a [`Record`], in column order.
pub fn record_from_row(row: &Row) -> OrmResult<Record> {
    let mut record = Record::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let PgColumn(value) = row
            .try_get::<_, PgColumn>(idx)
            .map_err(|e| OrmError::decode(column.name(), e.to_string()))?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bind(value: &Value, ty: &Type) -> Result<(IsNull, BytesMut), BoxError> {
        let mut out = BytesMut::new();
        let is_null = PgParam(value).to_sql(ty, &mut out)?;
        Ok((is_null, out))
    }

    #[test]
    fn integers_follow_parameter_width() {
        let (_, out) = bind(&json!(7), &Type::INT4).unwrap();
        assert_eq!(&out[..], &7i32.to_be_bytes());

        let (_, out) = bind(&json!(7), &Type::INT8).unwrap();
        assert_eq!(&out[..], &7i64.to_be_bytes());
    }

    #[test]
    fn out_of_range_integer_is_rejected() {
        assert!(bind(&json!(70_000), &Type::INT2).is_err());
        assert!(bind(&json!(1.5), &Type::INT4).is_err());
    }

    #[test]
    fn null_binds_as_sql_null() {
        let (is_null, out) = bind(&Value::Null, &Type::TEXT).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
        assert!(out.is_empty());
    }

    #[test]
    fn strings_bind_as_text_or_parse_into_typed_slots() {
        let (_, out) = bind(&json!("bob"), &Type::TEXT).unwrap();
        assert_eq!(&out[..], b"bob");

        let (_, out) = bind(&json!("42"), &Type::INT4).unwrap();
        assert_eq!(&out[..], &42i32.to_be_bytes());

        assert!(bind(&json!("not-a-uuid"), &Type::UUID).is_err());
    }

    #[test]
    fn objects_only_bind_to_json_columns() {
        assert!(bind(&json!({"a": 1}), &Type::JSONB).is_ok());
        assert!(bind(&json!({"a": 1}), &Type::TEXT).is_err());
    }

    fn numeric_bytes(text: &str) -> BytesMut {
        let mut out = BytesMut::new();
        Decimal::from_str(text)
            .unwrap()
            .to_sql(&Type::NUMERIC, &mut out)
            .unwrap();
        out
    }

    #[test]
    fn numbers_and_numeric_strings_bind_as_numeric() {
        let (_, out) = bind(&json!(9.99), &Type::NUMERIC).unwrap();
        assert_eq!(out, numeric_bytes("9.99"));

        let (_, out) = bind(&json!(42), &Type::NUMERIC).unwrap();
        assert_eq!(out, numeric_bytes("42"));

        let (_, out) = bind(&json!("12345678901234567890.125"), &Type::NUMERIC).unwrap();
        assert_eq!(out, numeric_bytes("12345678901234567890.125"));

        assert!(bind(&json!("twelve"), &Type::NUMERIC).is_err());
    }

    #[test]
    fn numeric_columns_decode_to_numbers_when_exact() {
        let col = PgColumn::from_sql(&Type::NUMERIC, &numeric_bytes("1")).unwrap();
        assert_eq!(col.0, json!(1));

        // AVG over integers comes back with trailing zeros.
        let col = PgColumn::from_sql(&Type::NUMERIC, &numeric_bytes("2.5000")).unwrap();
        assert_eq!(col.0, json!(2.5));

        let col = PgColumn::from_sql(&Type::NUMERIC, &numeric_bytes("-0.01")).unwrap();
        assert_eq!(col.0, json!(-0.01));

        let col =
            PgColumn::from_sql(&Type::NUMERIC, &numeric_bytes("12345678901234567890.125")).unwrap();
        assert_eq!(col.0, json!("12345678901234567890.125"));
    }

    #[test]
    fn columns_decode_to_json() {
        let col = PgColumn::from_sql(&Type::INT8, &42i64.to_be_bytes()).unwrap();
        assert_eq!(col.0, json!(42));

        let col = PgColumn::from_sql(&Type::BOOL, &[1]).unwrap();
        assert_eq!(col.0, json!(true));

        let col = PgColumn::from_sql(&Type::TEXT, b"hello").unwrap();
        assert_eq!(col.0, json!("hello"));

        let col = PgColumn::from_sql_null(&Type::TEXT).unwrap();
        assert_eq!(col.0, Value::Null);
    }
}
