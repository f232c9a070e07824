//! Generic record mapping and CRUD.
//!
//! An entity type implements [`Record`] by declaring its [`TableSchema`]
//! and converting itself to and from a [`Row`]. Everything else (`save`,
//! `delete`, `get_by_id`, `get_all`, `find`, `count`) comes from the
//! trait's provided methods. Each of those borrows one pooled connection
//! for the duration of the call and returns it on every exit path.

use std::time::Instant;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use podmark_types::{EpisodeStatus, MarketingContentStatus, SocialPlatform, UserRole};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use rusqlite::Connection;

use crate::error::DbError;
use crate::pool::DbPool;
use crate::query::{QueryBuilder, StatementKind, TableSchema};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A Rust type that maps onto a single SQLite column.
///
/// `from_value(&to_value(x))` must return `x` exactly.
pub trait FieldValue: Sized {
    /// Converts the field into a column value.
    fn to_value(&self) -> Value;

    /// Reads the field back from a column value, describing any mismatch.
    fn from_value(value: &Value) -> Result<Self, String>;
}

fn mismatch(expected: &str, value: &Value) -> String {
    format!("expected {expected}, found {}", value.data_type())
}

impl FieldValue for i64 {
    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Integer(i) => Ok(*i),
            other => Err(mismatch("integer", other)),
        }
    }
}

impl FieldValue for i32 {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide).map_err(|_| format!("{wide} does not fit in a 32-bit integer"))
    }
}

impl FieldValue for f64 {
    fn to_value(&self) -> Value {
        Value::Real(*self)
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Real(f) => Ok(*f),
            Value::Integer(i) => Ok(*i as f64),
            other => Err(mismatch("real", other)),
        }
    }
}

impl FieldValue for bool {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Integer(0) => Ok(false),
            Value::Integer(1) => Ok(true),
            Value::Integer(i) => Err(format!("{i} is not a boolean")),
            other => Err(mismatch("boolean integer", other)),
        }
    }
}

impl FieldValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            other => Err(mismatch("text", other)),
        }
    }
}

impl FieldValue for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Blob(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Blob(b) => Ok(b.clone()),
            other => Err(mismatch("blob", other)),
        }
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(inner) => inner.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Stored as fixed-width RFC 3339 text with nanoseconds, so text order is time order.
impl FieldValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::Text(self.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        let text = String::from_value(value)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| format!("invalid timestamp {text:?}: {e}"))
    }
}

impl FieldValue for NaiveDate {
    fn to_value(&self) -> Value {
        Value::Text(self.format(DATE_FORMAT).to_string())
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        let text = String::from_value(value)?;
        NaiveDate::parse_from_str(&text, DATE_FORMAT)
            .map_err(|e| format!("invalid date {text:?}: {e}"))
    }
}

macro_rules! label_field {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FieldValue for $ty {
                fn to_value(&self) -> Value {
                    Value::Text(self.as_str().to_string())
                }

                fn from_value(value: &Value) -> Result<Self, String> {
                    String::from_value(value)?
                        .parse()
                        .map_err(|e: podmark_types::ParseEnumError| e.to_string())
                }
            }
        )*
    };
}

label_field!(UserRole, EpisodeStatus, MarketingContentStatus, SocialPlatform);

/// Ordered column → value representation of one table row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<(&'static str, Value)>,
}

impl Row {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends (or replaces) `column` with the field's value.
    pub fn with<V: FieldValue>(mut self, column: &'static str, value: &V) -> Self {
        self.set(column, value.to_value());
        self
    }

    /// Sets `column`, replacing an existing value in place.
    pub fn set(&mut self, column: &'static str, value: Value) {
        match self.values.iter_mut().find(|(c, _)| *c == column) {
            Some((_, slot)) => *slot = value,
            None => self.values.push((column, value)),
        }
    }

    /// Raw value of `column`, if present.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }

    /// Reads `column` as a typed field.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Mapping` if the column is absent or has the wrong type.
    pub fn get<V: FieldValue>(&self, column: &str) -> Result<V, DbError> {
        let value = self
            .value(column)
            .ok_or_else(|| DbError::mapping(column, "column missing from row"))?;
        V::from_value(value).map_err(|reason| DbError::mapping(column, reason))
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.iter().map(|(c, _)| *c)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn from_sql(row: &rusqlite::Row<'_>, columns: &[&'static str]) -> Result<Self, DbError> {
        let mut values = Vec::with_capacity(columns.len());
        for column in columns {
            let value: Value = row.get(*column)?;
            values.push((*column, value));
        }
        Ok(Self { values })
    }
}

impl IntoIterator for Row {
    type Item = (&'static str, Value);
    type IntoIter = std::vec::IntoIter<(&'static str, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

/// A primary key generated by an insert.
///
/// Only the mapper can construct one, so [`Record::assign_primary_key`] is
/// unreachable from outside `save`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratedKey(i64);

impl GeneratedKey {
    /// The key value.
    pub fn get(self) -> i64 {
        self.0
    }
}

/// An entity persisted as one row of a declared table.
///
/// A record whose [`primary_key`](Record::primary_key) is `None` has never
/// been saved. The key is assigned by the first `save` and must not change
/// afterwards. Implementors should keep the key field private and expose it
/// read-only.
pub trait Record: Sized {
    /// Table, ordered columns, and key column.
    const SCHEMA: TableSchema;

    /// The persisted key, if any.
    fn primary_key(&self) -> Option<i64>;

    /// Stores the key generated by an insert.
    fn assign_primary_key(&mut self, key: GeneratedKey);

    /// Converts the entity into a row holding every schema column.
    fn to_row(&self) -> Row;

    /// Rebuilds the entity from a row produced by `to_row` or read from the table.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Mapping` if a column is missing or mistyped.
    fn from_row(row: &Row) -> Result<Self, DbError>;

    /// A `SELECT` of every schema column, ready for further filtering.
    fn query() -> QueryBuilder {
        QueryBuilder::new()
            .table(Self::SCHEMA)
            .select(Self::SCHEMA.columns)
    }

    /// Inserts the record if it has no key, otherwise updates its row.
    ///
    /// # Errors
    ///
    /// Returns pool errors, `DbError::Query` on execution failure, and
    /// `DbError::NotFound` if an update matched no row.
    fn save(&mut self, pool: &DbPool) -> Result<(), DbError> {
        save_record(self, pool)
    }

    /// Deletes the record's row, consuming the record.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidState` if the record was never saved and
    /// `DbError::NotFound` if no row had its key.
    fn delete(self, pool: &DbPool) -> Result<(), DbError> {
        delete_record(self, pool)
    }

    /// Loads the record with the given key.
    ///
    /// # Errors
    ///
    /// Returns `DbError::NotFound` if no row has that key.
    fn get_by_id(pool: &DbPool, key: i64) -> Result<Self, DbError> {
        let query = Self::query().where_eq(Self::SCHEMA.primary_key, key).limit(1);
        Self::find(pool, query)?
            .into_iter()
            .next()
            .ok_or(DbError::NotFound {
                table: Self::SCHEMA.table,
                column: Self::SCHEMA.primary_key,
                key,
            })
    }

    /// Loads every row of the table.
    ///
    /// # Errors
    ///
    /// Returns pool, query, or mapping errors.
    fn get_all(pool: &DbPool) -> Result<Vec<Self>, DbError> {
        Self::find(pool, Self::query())
    }

    /// Loads the rows matched by `query`, which should start from [`Record::query`].
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidQuery` if `query` targets another table or
    /// is not a `SELECT`, plus pool, query, or mapping errors.
    fn find(pool: &DbPool, query: QueryBuilder) -> Result<Vec<Self>, DbError> {
        check_target::<Self>(&query)?;
        let (sql, params) = query.build()?;
        let conn = pool.get()?;
        conn.with_deadline(statement_deadline(pool), |c| fetch::<Self>(c, &sql, &params))
    }

    /// Counts the rows matched by `query`.
    ///
    /// # Errors
    ///
    /// Same as [`Record::find`].
    fn count(pool: &DbPool, query: QueryBuilder) -> Result<i64, DbError> {
        check_target::<Self>(&query)?;
        let (sql, params) = query.count().build()?;
        let conn = pool.get()?;
        conn.with_deadline(statement_deadline(pool), |c| {
            Ok(c.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?)
        })
    }
}

fn statement_deadline(pool: &DbPool) -> Option<Instant> {
    pool.config()
        .statement_timeout
        .and_then(|timeout| Instant::now().checked_add(timeout))
}

fn check_target<R: Record>(query: &QueryBuilder) -> Result<(), DbError> {
    if query.schema() != Some(R::SCHEMA) {
        return Err(DbError::InvalidQuery(format!(
            "query does not target `{}`",
            R::SCHEMA.table
        )));
    }
    if !matches!(query.kind(), StatementKind::Select | StatementKind::Count) {
        return Err(DbError::InvalidQuery(
            "record lookups require a SELECT".to_string(),
        ));
    }
    Ok(())
}

fn fetch<R: Record>(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<R>, DbError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let row = Row::from_sql(row, R::SCHEMA.columns)?;
        records.push(R::from_row(&row)?);
    }
    Ok(records)
}

fn save_record<R: Record>(record: &mut R, pool: &DbPool) -> Result<(), DbError> {
    let schema = R::SCHEMA;
    let values: Vec<(&'static str, Value)> = record
        .to_row()
        .into_iter()
        .filter(|(column, _)| *column != schema.primary_key)
        .collect();

    match record.primary_key() {
        None => {
            let (sql, params) = QueryBuilder::new()
                .table(schema)
                .insert_values(values)
                .returning(schema.primary_key)
                .build()?;
            let conn = pool.get()?;
            let key: i64 = conn.with_deadline(statement_deadline(pool), |c| {
                Ok(c.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?)
            })?;
            record.assign_primary_key(GeneratedKey(key));
            tracing::debug!(table = schema.table, key, "inserted record");
        }
        Some(key) => {
            if values.is_empty() {
                return Ok(());
            }
            let (sql, params) = QueryBuilder::new()
                .table(schema)
                .update_set(values)
                .where_eq(schema.primary_key, key)
                .build()?;
            let conn = pool.get()?;
            let changed = conn.with_deadline(statement_deadline(pool), |c| {
                Ok(c.execute(&sql, params_from_iter(params.iter()))?)
            })?;
            if changed == 0 {
                return Err(DbError::NotFound {
                    table: schema.table,
                    column: schema.primary_key,
                    key,
                });
            }
            tracing::debug!(table = schema.table, key, "updated record");
        }
    }
    Ok(())
}

fn delete_record<R: Record>(record: R, pool: &DbPool) -> Result<(), DbError> {
    let schema = R::SCHEMA;
    let Some(key) = record.primary_key() else {
        return Err(DbError::InvalidState(format!(
            "cannot delete a `{}` record that was never saved",
            schema.table
        )));
    };

    let (sql, params) = QueryBuilder::new()
        .table(schema)
        .delete()
        .where_eq(schema.primary_key, key)
        .build()?;
    let conn = pool.get()?;
    let changed = conn.with_deadline(statement_deadline(pool), |c| {
        Ok(c.execute(&sql, params_from_iter(params.iter()))?)
    })?;
    if changed == 0 {
        return Err(DbError::NotFound {
            table: schema.table,
            column: schema.primary_key,
            key,
        });
    }
    tracing::debug!(table = schema.table, key, "deleted record");
    Ok(())
}
