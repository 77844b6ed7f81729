use std::error::Error;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use postgres_types::{to_sql_checked, FromSql, IsNull, ToSql, Type};

use crate::error::{AppError, Result};

type BoxError = Box<dyn Error + Sync + Send>;

/// Dynamically typed bind parameter / column value.
///
/// Lets the upsert writer and the storage capability stay agnostic of the entity
/// being written, and lets tests run the same statements against an in-memory store.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Json(serde_json::Value),
    IntArray(Vec<i64>),
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<Vec<i64>> for SqlValue {
    fn from(v: Vec<i64>) -> Self {
        SqlValue::IntArray(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => v.to_sql_checked(ty, out),
            SqlValue::Int(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql_checked(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql_checked(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            SqlValue::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql_checked(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            SqlValue::Text(v) => v.to_sql_checked(ty, out),
            SqlValue::Timestamp(v) => v.to_sql_checked(ty, out),
            SqlValue::Date(v) => v.to_sql_checked(ty, out),
            SqlValue::Json(v) => v.to_sql_checked(ty, out),
            SqlValue::IntArray(v) => v.to_sql_checked(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for SqlValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        let value = match *ty {
            Type::BOOL => SqlValue::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => SqlValue::Int(i16::from_sql(ty, raw)? as i64),
            Type::INT4 => SqlValue::Int(i32::from_sql(ty, raw)? as i64),
            Type::INT8 => SqlValue::Int(i64::from_sql(ty, raw)?),
            Type::FLOAT4 => SqlValue::Float(f32::from_sql(ty, raw)? as f64),
            Type::FLOAT8 => SqlValue::Float(f64::from_sql(ty, raw)?),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
                SqlValue::Text(String::from_sql(ty, raw)?)
            },
            Type::TIMESTAMPTZ => SqlValue::Timestamp(DateTime::<Utc>::from_sql(ty, raw)?),
            Type::TIMESTAMP => SqlValue::Timestamp(NaiveDateTime::from_sql(ty, raw)?.and_utc()),
            Type::DATE => SqlValue::Date(NaiveDate::from_sql(ty, raw)?),
            Type::JSON | Type::JSONB => SqlValue::Json(serde_json::Value::from_sql(ty, raw)?),
            Type::INT8_ARRAY => SqlValue::IntArray(Vec::<i64>::from_sql(ty, raw)?),
            _ => return Err(format!("unsupported column type {}", ty).into()),
        };
        Ok(value)
    }

    fn from_sql_null(_ty: &Type) -> std::result::Result<Self, BoxError> {
        Ok(SqlValue::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// A result row with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRow {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn value(&self, column: &str) -> Result<&SqlValue> {
        let i = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| AppError::data(format!("column {} missing from row", column)))?;
        self.values.get(i).ok_or_else(|| {
            AppError::data(format!(
                "column {} has no value ({} values for {} columns)",
                column,
                self.values.len(),
                self.columns.len()
            ))
        })
    }

    fn mismatch(column: &str, expected: &str, got: &SqlValue) -> AppError {
        AppError::data(format!("column {}: expected {}, got {:?}", column, expected, got))
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        match self.value(column)? {
            SqlValue::Int(v) => Ok(*v),
            other => Err(Self::mismatch(column, "integer", other)),
        }
    }

    pub fn get_f64(&self, column: &str) -> Result<f64> {
        match self.value(column)? {
            SqlValue::Float(v) => Ok(*v),
            SqlValue::Int(v) => Ok(*v as f64),
            other => Err(Self::mismatch(column, "float", other)),
        }
    }

    pub fn get_opt_f64(&self, column: &str) -> Result<Option<f64>> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            _ => self.get_f64(column).map(Some),
        }
    }

    pub fn get_bool(&self, column: &str) -> Result<bool> {
        match self.value(column)? {
            SqlValue::Bool(v) => Ok(*v),
            other => Err(Self::mismatch(column, "bool", other)),
        }
    }

    pub fn get_text(&self, column: &str) -> Result<String> {
        match self.value(column)? {
            SqlValue::Text(v) => Ok(v.clone()),
            other => Err(Self::mismatch(column, "text", other)),
        }
    }

    pub fn get_timestamp(&self, column: &str) -> Result<DateTime<Utc>> {
        match self.value(column)? {
            SqlValue::Timestamp(v) => Ok(*v),
            other => Err(Self::mismatch(column, "timestamp", other)),
        }
    }

    pub fn get_opt_timestamp(&self, column: &str) -> Result<Option<DateTime<Utc>>> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            _ => self.get_timestamp(column).map(Some),
        }
    }

    pub fn get_date(&self, column: &str) -> Result<NaiveDate> {
        match self.value(column)? {
            SqlValue::Date(v) => Ok(*v),
            SqlValue::Timestamp(v) => Ok(v.date_naive()),
            other => Err(Self::mismatch(column, "date", other)),
        }
    }

    pub fn get_opt_json(&self, column: &str) -> Result<Option<serde_json::Value>> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Json(v) => Ok(Some(v.clone())),
            other => Err(Self::mismatch(column, "json", other)),
        }
    }
}
