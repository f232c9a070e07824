//! Parameterized SQL statement builder.
//!
//! Identifiers (table and column names) are only accepted from a
//! [`TableSchema`], which record types declare as compile-time constants.
//! Caller-supplied values are always bound as parameters. Predicate
//! templates must be `&'static str` so request data can never reach the
//! SQL text.
//!
//! ```rust,ignore
//! let (sql, params) = QueryBuilder::new()
//!     .table(Podcast::SCHEMA)
//!     .select(&["id", "title"])
//!     .filter("user_id = ?", [7])
//!     .order_by("created_at", Order::Desc)
//!     .limit(10)
//!     .build()?;
//! ```

use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::ToSql;

use crate::error::DbError;

/// Static description of a table: its name, ordered columns, and primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub table: &'static str,
    /// Every column, in declaration order. Includes the primary key.
    pub columns: &'static [&'static str],
    /// Integer primary-key column.
    pub primary_key: &'static str,
}

impl TableSchema {
    /// Declares a table schema.
    pub const fn new(
        table: &'static str,
        columns: &'static [&'static str],
        primary_key: &'static str,
    ) -> Self {
        Self {
            table,
            columns,
            primary_key,
        }
    }

    /// Whether `column` is registered for this table.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }

    /// Columns other than the primary key, in declaration order.
    pub fn value_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        let pk = self.primary_key;
        self.columns.iter().copied().filter(move |c| *c != pk)
    }
}

/// Sort direction for `ORDER BY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Smallest first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

impl Order {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum StatementKind {
    #[default]
    Select,
    Count,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy)]
enum Predicate {
    Eq(&'static str),
    Template(&'static str),
}

/// Converts any bindable value into an owned SQLite value.
pub(crate) fn to_value(value: &dyn ToSql) -> Result<Value, DbError> {
    match value.to_sql()? {
        ToSqlOutput::Borrowed(v) => Ok(v.into()),
        ToSqlOutput::Owned(v) => Ok(v),
        other => Err(DbError::InvalidQuery(format!(
            "unsupported parameter kind: {other:?}"
        ))),
    }
}

/// Fluent builder for one parameterized statement.
///
/// Each method consumes and returns the builder; `build` consumes it for
/// good. Misuse is recorded and reported by `build` rather than panicking
/// mid-chain.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    schema: Option<TableSchema>,
    kind: StatementKind,
    columns: Vec<&'static str>,
    filters: Vec<Predicate>,
    filter_params: Vec<Value>,
    ordering: Vec<(&'static str, Order)>,
    limit: Option<i64>,
    offset: Option<i64>,
    assignments: Vec<(&'static str, Value)>,
    returning: Option<&'static str>,
    errors: Vec<String>,
}

impl QueryBuilder {
    /// Starts an empty `SELECT` builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards everything configured so far.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Targets the table described by `schema`.
    pub fn table(mut self, schema: TableSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Selects `columns` instead of `*`.
    pub fn select(mut self, columns: &[&'static str]) -> Self {
        self.kind = StatementKind::Select;
        for column in columns {
            self.check_column(column);
            self.columns.push(*column);
        }
        self
    }

    /// Turns the statement into `SELECT COUNT(*)`.
    pub fn count(mut self) -> Self {
        self.kind = StatementKind::Count;
        self
    }

    /// Adds a predicate, ANDed with any others.
    ///
    /// The template holds one bare `?` per value in `params`, in order.
    /// Numbered (`?1`) and named (`:name`, `@name`, `$name`) parameters are
    /// rejected.
    pub fn filter<P, I>(mut self, template: &'static str, params: I) -> Self
    where
        P: ToSql,
        I: IntoIterator<Item = P>,
    {
        let before = self.filter_params.len();
        for param in params {
            match to_value(&param) {
                Ok(value) => self.filter_params.push(value),
                Err(err) => self.errors.push(err.to_string()),
            }
        }
        let bound = self.filter_params.len() - before;

        if template.contains(';') {
            self.errors
                .push(format!("predicate `{template}` must not contain `;`"));
        }
        match count_placeholders(template) {
            Ok(placeholders) if placeholders != bound => self.errors.push(format!(
                "predicate `{template}` has {placeholders} placeholder(s) but {bound} value(s)"
            )),
            Ok(_) => {}
            Err(reason) => self.errors.push(format!("predicate `{template}` {reason}")),
        }
        self.filters.push(Predicate::Template(template));
        self
    }

    /// Adds `column = ?` for a registered column.
    pub fn where_eq<P: ToSql>(mut self, column: &'static str, value: P) -> Self {
        self.check_column(column);
        match to_value(&value) {
            Ok(value) => {
                self.filters.push(Predicate::Eq(column));
                self.filter_params.push(value);
            }
            Err(err) => self.errors.push(err.to_string()),
        }
        self
    }

    /// Appends an `ORDER BY` term.
    pub fn order_by(mut self, column: &'static str, order: Order) -> Self {
        self.check_column(column);
        self.ordering.push((column, order));
        self
    }

    /// Caps the number of rows returned.
    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(i64::from(n));
        self
    }

    /// Skips the first `n` rows.
    pub fn offset(mut self, n: u32) -> Self {
        self.offset = Some(i64::from(n));
        self
    }

    /// Turns the statement into an `INSERT` of the given column values.
    pub fn insert_values<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, Value)>,
    {
        self.kind = StatementKind::Insert;
        self.push_assignments(values);
        self
    }

    /// Turns the statement into an `UPDATE` setting the given column values.
    pub fn update_set<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, Value)>,
    {
        self.kind = StatementKind::Update;
        self.push_assignments(values);
        self
    }

    /// Turns the statement into a `DELETE`.
    pub fn delete(mut self) -> Self {
        self.kind = StatementKind::Delete;
        self
    }

    /// Adds `RETURNING column` to an `INSERT`.
    pub fn returning(mut self, column: &'static str) -> Self {
        self.check_column(column);
        self.returning = Some(column);
        self
    }

    pub(crate) fn schema(&self) -> Option<TableSchema> {
        self.schema
    }

    pub(crate) fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Renders the SQL text and its parameter list.
    ///
    /// # Errors
    ///
    /// Returns `DbError::InvalidQuery` if no table was set, an identifier is
    /// not part of the schema, placeholders and values disagree, or the
    /// statement kind does not accept the configured clauses.
    pub fn build(self) -> Result<(String, Vec<Value>), DbError> {
        let Some(schema) = self.schema else {
            return Err(DbError::InvalidQuery("no table selected".to_string()));
        };
        if !self.errors.is_empty() {
            return Err(DbError::InvalidQuery(self.errors.join("; ")));
        }

        let table = quote(schema.table);
        let mut params = Vec::new();
        let mut sql = match self.kind {
            StatementKind::Select => {
                let columns = if self.columns.is_empty() {
                    "*".to_string()
                } else {
                    join_quoted(&self.columns)
                };
                format!("SELECT {columns} FROM {table}")
            }
            StatementKind::Count => format!("SELECT COUNT(*) FROM {table}"),
            StatementKind::Insert => {
                if self.assignments.is_empty() {
                    format!("INSERT INTO {table} DEFAULT VALUES")
                } else {
                    let columns: Vec<&str> = self.assignments.iter().map(|(c, _)| *c).collect();
                    let placeholders = vec!["?"; columns.len()].join(", ");
                    params.extend(self.assignments.iter().map(|(_, v)| v.clone()));
                    format!(
                        "INSERT INTO {table} ({}) VALUES ({placeholders})",
                        join_quoted(&columns)
                    )
                }
            }
            StatementKind::Update => {
                if self.assignments.is_empty() {
                    return Err(DbError::InvalidQuery(
                        "UPDATE needs at least one column".to_string(),
                    ));
                }
                let set: Vec<String> = self
                    .assignments
                    .iter()
                    .map(|(c, _)| format!("{} = ?", quote(c)))
                    .collect();
                params.extend(self.assignments.iter().map(|(_, v)| v.clone()));
                format!("UPDATE {table} SET {}", set.join(", "))
            }
            StatementKind::Delete => format!("DELETE FROM {table}"),
        };

        let is_insert = self.kind == StatementKind::Insert;
        if is_insert && !self.filters.is_empty() {
            return Err(DbError::InvalidQuery("INSERT cannot have a WHERE clause".to_string()));
        }
        if !self.filters.is_empty() {
            let predicates: Vec<String> = self
                .filters
                .iter()
                .map(|p| match p {
                    Predicate::Eq(column) => format!("{} = ?", quote(column)),
                    Predicate::Template(template) => format!("({template})"),
                })
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
            params.extend(self.filter_params);
        }

        let is_read = matches!(self.kind, StatementKind::Select | StatementKind::Count);
        if !is_read && (!self.ordering.is_empty() || self.limit.is_some() || self.offset.is_some())
        {
            return Err(DbError::InvalidQuery(
                "ORDER BY / LIMIT / OFFSET apply to SELECT only".to_string(),
            ));
        }
        if !self.ordering.is_empty() {
            let terms: Vec<String> = self
                .ordering
                .iter()
                .map(|(c, o)| format!("{} {}", quote(c), o.as_sql()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), offset) => {
                sql.push_str(" LIMIT ?");
                params.push(Value::Integer(limit));
                if let Some(offset) = offset {
                    sql.push_str(" OFFSET ?");
                    params.push(Value::Integer(offset));
                }
            }
            // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
            (None, Some(offset)) => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                params.push(Value::Integer(offset));
            }
            (None, None) => {}
        }

        if let Some(column) = self.returning {
            if !is_insert {
                return Err(DbError::InvalidQuery("RETURNING applies to INSERT only".to_string()));
            }
            sql.push_str(" RETURNING ");
            sql.push_str(&quote(column));
        }

        Ok((sql, params))
    }

    fn check_column(&mut self, column: &str) {
        match self.schema {
            Some(schema) if schema.has_column(column) => {}
            Some(schema) => self.errors.push(format!(
                "`{column}` is not a column of `{}`",
                schema.table
            )),
            None => self
                .errors
                .push(format!("column `{column}` used before a table was selected")),
        }
    }

    fn push_assignments<I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (&'static str, Value)>,
    {
        for (column, value) in values {
            self.check_column(column);
            self.assignments.push((column, value));
        }
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{identifier}\"")
}

fn join_quoted(identifiers: &[&str]) -> String {
    identifiers
        .iter()
        .map(|c| quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Counts `?` placeholders outside quoted literals.
///
/// Fails on numbered or named parameter syntax, which would not line up
/// with the positional values.
fn count_placeholders(template: &str) -> Result<usize, String> {
    let mut count = 0;
    let mut quote: Option<char> = None;
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (None, '\'' | '"') => quote = Some(ch),
            (Some(q), c) if c == q => quote = None,
            (None, '?') => {
                if chars.peek().is_some_and(char::is_ascii_digit) {
                    return Err("uses a numbered `?N` parameter; use bare `?`".to_string());
                }
                count += 1;
            }
            (None, ':' | '@' | '$') => {
                if chars
                    .peek()
                    .is_some_and(|next| next.is_ascii_alphanumeric() || *next == '_')
                {
                    return Err(format!("uses a named `{ch}` parameter; use bare `?`"));
                }
            }
            _ => {}
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PODCASTS: TableSchema = TableSchema::new("podcasts", &["id", "title", "user_id"], "id");

    #[test]
    fn where_values_are_bound_not_inlined() {
        let (sql, params) = QueryBuilder::new()
            .table(PODCASTS)
            .select(&["id", "title"])
            .filter("id = ?", [5])
            .build()
            .expect("select should build");

        assert_eq!(sql, r#"SELECT "id", "title" FROM "podcasts" WHERE (id = ?)"#);
        assert!(!sql.contains('5'));
        assert_eq!(params, vec![Value::Integer(5)]);
    }

    #[test]
    fn select_with_order_limit_offset() {
        let (sql, params) = QueryBuilder::new()
            .table(PODCASTS)
            .where_eq("user_id", 7_i64)
            .filter("title LIKE ?", ["%show%"])
            .order_by("title", Order::Desc)
            .order_by("id", Order::Asc)
            .limit(10)
            .offset(20)
            .build()
            .expect("select should build");

        assert_eq!(
            sql,
            concat!(
                r#"SELECT * FROM "podcasts" WHERE "user_id" = ? AND (title LIKE ?) "#,
                r#"ORDER BY "title" DESC, "id" ASC LIMIT ? OFFSET ?"#,
            )
        );
        assert_eq!(
            params,
            vec![
                Value::Integer(7),
                Value::Text("%show%".to_string()),
                Value::Integer(10),
                Value::Integer(20),
            ]
        );
    }

    #[test]
    fn offset_without_limit_is_unbounded() {
        let (sql, params) = QueryBuilder::new()
            .table(PODCASTS)
            .offset(3)
            .build()
            .expect("select should build");
        assert_eq!(sql, r#"SELECT * FROM "podcasts" LIMIT -1 OFFSET ?"#);
        assert_eq!(params, vec![Value::Integer(3)]);
    }

    #[test]
    fn insert_with_returning() {
        let (sql, params) = QueryBuilder::new()
            .table(PODCASTS)
            .insert_values([
                ("title", Value::Text("X".to_string())),
                ("user_id", Value::Integer(7)),
            ])
            .returning("id")
            .build()
            .expect("insert should build");

        assert_eq!(
            sql,
            r#"INSERT INTO "podcasts" ("title", "user_id") VALUES (?, ?) RETURNING "id""#
        );
        assert_eq!(params, vec![Value::Text("X".to_string()), Value::Integer(7)]);
    }

    #[test]
    fn update_binds_set_values_before_predicate_values() {
        let (sql, params) = QueryBuilder::new()
            .table(PODCASTS)
            .update_set([("title", Value::Text("Y".to_string()))])
            .where_eq("id", 3_i64)
            .build()
            .expect("update should build");

        assert_eq!(sql, r#"UPDATE "podcasts" SET "title" = ? WHERE "id" = ?"#);
        assert_eq!(params, vec![Value::Text("Y".to_string()), Value::Integer(3)]);
    }

    #[test]
    fn delete_with_key() {
        let (sql, params) = QueryBuilder::new()
            .table(PODCASTS)
            .delete()
            .where_eq("id", 9_i64)
            .build()
            .expect("delete should build");
        assert_eq!(sql, r#"DELETE FROM "podcasts" WHERE "id" = ?"#);
        assert_eq!(params, vec![Value::Integer(9)]);
    }

    #[test]
    fn unregistered_identifiers_are_rejected() {
        let err = QueryBuilder::new()
            .table(PODCASTS)
            .order_by("title; DROP TABLE podcasts", Order::Asc)
            .build()
            .expect_err("unknown column should fail");
        assert!(matches!(err, DbError::InvalidQuery(_)));

        let err = QueryBuilder::new()
            .table(PODCASTS)
            .update_set([("password", Value::Null)])
            .build()
            .expect_err("unknown assignment column should fail");
        assert!(err.to_string().contains("`password` is not a column of `podcasts`"));
    }

    #[test]
    fn placeholder_count_must_match_values() {
        let err = QueryBuilder::new()
            .table(PODCASTS)
            .filter("id = ? OR user_id = ?", [1])
            .build()
            .expect_err("mismatched placeholders should fail");
        assert!(err.to_string().contains("2 placeholder(s) but 1 value(s)"));

        // A question mark inside a quoted literal is not a placeholder.
        let (_, params) = QueryBuilder::new()
            .table(PODCASTS)
            .filter("title <> '?' AND id = ?", [1])
            .build()
            .expect("quoted question mark should be ignored");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn numbered_and_named_parameters_are_rejected() {
        for template in ["title = :t", "title = @t", "title = $t", "id = ?1"] {
            let err = QueryBuilder::new()
                .table(PODCASTS)
                .filter(template, Vec::<Value>::new())
                .build()
                .expect_err("non-positional parameter should fail");
            assert!(matches!(err, DbError::InvalidQuery(_)), "{template}: {err:?}");
            assert!(err.to_string().contains("use bare `?`"), "{template}: {err}");
        }

        // The same characters inside a literal are just text.
        let (_, params) = QueryBuilder::new()
            .table(PODCASTS)
            .filter("title <> ':t ?1' AND id = ?", [1])
            .build()
            .expect("quoted parameter syntax should be ignored");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn statement_separators_are_rejected() {
        let err = QueryBuilder::new()
            .table(PODCASTS)
            .filter("1 = 1; DELETE FROM podcasts", Vec::<Value>::new())
            .build()
            .expect_err("semicolon should fail");
        assert!(matches!(err, DbError::InvalidQuery(_)));
    }

    #[test]
    fn build_without_table_fails() {
        let err = QueryBuilder::new()
            .build()
            .expect_err("missing table should fail");
        assert!(matches!(err, DbError::InvalidQuery(_)));
    }

    #[test]
    fn limit_is_rejected_on_writes() {
        let err = QueryBuilder::new()
            .table(PODCASTS)
            .delete()
            .limit(1)
            .build()
            .expect_err("DELETE ... LIMIT should fail");
        assert!(matches!(err, DbError::InvalidQuery(_)));
    }

    #[test]
    fn reset_clears_previous_statement() {
        let mut builder = QueryBuilder::new()
            .table(PODCASTS)
            .filter("id = ?", [1])
            .limit(5);
        builder.reset();

        let err = builder
            .clone()
            .build()
            .expect_err("reset builder has no table");
        assert!(matches!(err, DbError::InvalidQuery(_)));

        let (sql, params) = builder
            .table(PODCASTS)
            .count()
            .build()
            .expect("count should build");
        assert_eq!(sql, r#"SELECT COUNT(*) FROM "podcasts""#);
        assert!(params.is_empty());
    }
}
