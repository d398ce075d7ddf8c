//! Per-engine parameter binding and row decoding
//!
//! Rows are decoded by column type name. Types without a mapping fall back to
//! their raw payload: text when it is UTF-8, bytes otherwise.

use crate::{DbError, DbResult, Row, Value};
use sqlx::encode::IsNull;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgRow, PgTypeInfo};
use sqlx::sqlite::SqliteRow;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{JsonValue, Uuid};
use sqlx::{Column, Encode, Postgres, Row as _, Type, TypeInfo, ValueRef};

/// Bind every statement parameter onto a fresh query for `$db`.
/// `$null` is what a [`Value::Null`] is sent as.
macro_rules! bind_params {
    ($db:ty, $statement:expr, $null:expr) => {{
        let statement = $statement;
        let mut query = sqlx::query::<$db>(statement.sql());
        for value in statement.params() {
            query = match value {
                Value::Null => query.bind($null),
                Value::Bool(v) => query.bind(*v),
                Value::Integer(v) => query.bind(*v),
                Value::Float(v) => query.bind(*v),
                Value::Text(v) => query.bind(v.as_str()),
                Value::Bytes(v) => query.bind(v.as_slice()),
            };
        }
        query
    }};
}

pub(crate) use bind_params;

/// NULL parameter without a declared type.
///
/// PostgreSQL infers the type of an OID-0 parameter from its context, so
/// `SET age = $1` with a NULL works on an integer column. A NULL sent as
/// TEXT would be rejected there.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl<'q> Encode<'q, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> IsNull {
        IsNull::Yes
    }
}

fn decode_columns<R, F>(row: &R, mut decode: F) -> DbResult<Row>
where
    R: sqlx::Row,
    F: FnMut(&R, usize, &str) -> Result<Value, sqlx::Error>,
{
    let mut out = Row::with_capacity(row.len());

    for column in row.columns() {
        let declared = column.type_info().name().to_ascii_uppercase();
        let value = decode(row, column.ordinal(), &declared).map_err(|e| DbError::Decode {
            column: column.name().to_string(),
            message: e.to_string(),
        })?;
        out.insert(column.name(), value);
    }

    Ok(out)
}

fn raw_payload<R>(row: &R, index: usize) -> Result<Value, sqlx::Error>
where
    R: sqlx::Row,
    Vec<u8>: for<'r> sqlx::Decode<'r, R::Database>,
    usize: sqlx::ColumnIndex<R>,
{
    let bytes: Vec<u8> = row.try_get_unchecked(index)?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => Value::Text(text),
        Err(e) => Value::Bytes(e.into_bytes()),
    })
}

pub(crate) fn sqlite_row(row: &SqliteRow) -> DbResult<Row> {
    decode_columns(row, sqlite_value)
}

fn sqlite_value(row: &SqliteRow, index: usize, declared: &str) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    // storage class of this value, which may differ from the declared type
    let stored = raw.type_info().name().to_ascii_uppercase();
    let is_bool = matches!(declared, "BOOLEAN" | "BOOL");

    let value = match stored.as_str() {
        "NULL" => Value::Null,
        "BOOLEAN" => Value::Bool(row.try_get_unchecked::<i64, _>(index)? != 0),
        "INTEGER" if is_bool => Value::Bool(row.try_get_unchecked::<i64, _>(index)? != 0),
        "INTEGER" => Value::Integer(row.try_get_unchecked(index)?),
        "REAL" => Value::Float(row.try_get_unchecked(index)?),
        "BLOB" => Value::Bytes(row.try_get_unchecked(index)?),
        // TEXT, DATETIME, DATE, TIME, NUMERIC: sqlite renders them as text
        _ => Value::Text(row.try_get_unchecked(index)?),
    };

    Ok(value)
}

pub(crate) fn mysql_row(row: &MySqlRow) -> DbResult<Row> {
    decode_columns(row, mysql_value)
}

fn mysql_value(row: &MySqlRow, index: usize, declared: &str) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match declared {
        "BOOLEAN" => Value::Bool(row.try_get_unchecked(index)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            Value::Integer(row.try_get_unchecked(index)?)
        }
        unsigned if unsigned.ends_with(" UNSIGNED") => {
            let n: u64 = row.try_get_unchecked(index)?;
            i64::try_from(n).map_or_else(|_| Value::Text(n.to_string()), Value::Integer)
        }
        "FLOAT" => Value::Float(f64::from(row.try_get_unchecked::<f32, _>(index)?)),
        "DOUBLE" => Value::Float(row.try_get_unchecked(index)?),
        "DATETIME" | "TIMESTAMP" => text_or_raw(row, index, |r, i| {
            r.try_get_unchecked::<NaiveDateTime, _>(i).map(|v| v.to_string())
        })?,
        "DATE" => text_or_raw(row, index, |r, i| {
            r.try_get_unchecked::<NaiveDate, _>(i).map(|v| v.to_string())
        })?,
        "TIME" => text_or_raw(row, index, |r, i| {
            r.try_get_unchecked::<NaiveTime, _>(i).map(|v| v.to_string())
        })?,
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "BIT"
        | "GEOMETRY" => Value::Bytes(row.try_get_unchecked(index)?),
        // VARCHAR, CHAR, TEXT, DECIMAL, JSON, ENUM, SET arrive as text
        _ => raw_payload(row, index)?,
    };

    Ok(value)
}

pub(crate) fn pg_row(row: &PgRow) -> DbResult<Row> {
    decode_columns(row, pg_value)
}

fn pg_value(row: &PgRow, index: usize, declared: &str) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match declared {
        "BOOL" => Value::Bool(row.try_get_unchecked(index)?),
        "INT2" => Value::Integer(i64::from(row.try_get_unchecked::<i16, _>(index)?)),
        "INT4" => Value::Integer(i64::from(row.try_get_unchecked::<i32, _>(index)?)),
        "INT8" => Value::Integer(row.try_get_unchecked(index)?),
        "FLOAT4" => Value::Float(f64::from(row.try_get_unchecked::<f32, _>(index)?)),
        "FLOAT8" => Value::Float(row.try_get_unchecked(index)?),
        "NUMERIC" => {
            let bytes: Vec<u8> = row.try_get_unchecked(index)?;
            match pg_numeric_text(&bytes) {
                Some(text) => Value::Text(text),
                None => Value::Bytes(bytes),
            }
        }
        "TIMESTAMP" => text_or_raw(row, index, |r, i| {
            r.try_get_unchecked::<NaiveDateTime, _>(i).map(|v| v.to_string())
        })?,
        "TIMESTAMPTZ" => text_or_raw(row, index, |r, i| {
            r.try_get_unchecked::<DateTime<Utc>, _>(i).map(|v| v.to_rfc3339())
        })?,
        "DATE" => text_or_raw(row, index, |r, i| {
            r.try_get_unchecked::<NaiveDate, _>(i).map(|v| v.to_string())
        })?,
        "TIME" => text_or_raw(row, index, |r, i| {
            r.try_get_unchecked::<NaiveTime, _>(i).map(|v| v.to_string())
        })?,
        "UUID" => text_or_raw(row, index, |r, i| {
            r.try_get_unchecked::<Uuid, _>(i).map(|v| v.to_string())
        })?,
        "JSON" | "JSONB" => text_or_raw(row, index, |r, i| {
            r.try_get_unchecked::<JsonValue, _>(i).map(|v| v.to_string())
        })?,
        "BYTEA" => Value::Bytes(row.try_get_unchecked(index)?),
        // TEXT, VARCHAR, BPCHAR, NAME, CITEXT and anything unmapped
        _ => raw_payload(row, index)?,
    };

    Ok(value)
}

/// Typed decode rendered as text, or the raw payload if the decode fails
fn text_or_raw<R, F>(row: &R, index: usize, decode: F) -> Result<Value, sqlx::Error>
where
    R: sqlx::Row,
    Vec<u8>: for<'r> sqlx::Decode<'r, R::Database>,
    usize: sqlx::ColumnIndex<R>,
    F: FnOnce(&R, usize) -> Result<String, sqlx::Error>,
{
    match decode(row, index) {
        Ok(text) => Ok(Value::Text(text)),
        Err(_) => raw_payload(row, index),
    }
}

/// Render a binary-format PostgreSQL NUMERIC as a decimal string.
///
/// Layout: ndigits, weight, sign, dscale (all i16 big-endian), then `ndigits`
/// base-10000 digits; digit `k` carries the factor 10000^(weight - k).
pub(crate) fn pg_numeric_text(buf: &[u8]) -> Option<String> {
    let word = |i: usize| {
        buf.get(i * 2..i * 2 + 2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
    };

    let ndigits = usize::try_from(word(0)?).ok()?;
    let weight = i32::from(word(1)?);
    let sign = word(2)? as u16;
    let dscale = usize::try_from(word(3)?).ok()?;

    match sign {
        0xC000 => return Some("NaN".to_string()),
        0xD000 => return Some("Infinity".to_string()),
        0xF000 => return Some("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|k| word(4 + k))
        .collect::<Option<Vec<i16>>>()?;
    let digit = |k: i32| {
        usize::try_from(k)
            .ok()
            .and_then(|k| digits.get(k).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == 0x4000 {
        text.push('-');
    }

    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&digit(0).to_string());
        for k in 1..=weight {
            text.push_str(&format!("{:04}", digit(k)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut k = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(k)));
            k += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }

    Some(text)
}
