//! Fluent SQL builder with positional parameters
//!
//! The builder always writes `?` markers and records each bound value under an
//! explicit index. [`QueryBuilder::build`] refuses to produce a [`Statement`]
//! unless the indices are exactly `0..n` and `n` matches the markers in the
//! text, so a mis-numbered binding fails before it reaches the driver.

use crate::{count_placeholders, DbError, DbResult, Dialect, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Select,
    Insert,
    Update,
    Delete,
}

/// Statement under construction
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    dialect: Dialect,
    kind: Kind,
    table: String,
    alias: Option<String>,
    select: Vec<String>,
    values: Vec<(String, String)>,
    sets: Vec<(String, String)>,
    predicates: Vec<String>,
    params: BTreeMap<usize, Value>,
}

impl QueryBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            kind: Kind::Select,
            table: String::new(),
            alias: None,
            select: Vec::new(),
            values: Vec::new(),
            sets: Vec::new(),
            predicates: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Start a SELECT of the given expression (`t.*`, `t.name`, `COUNT(*)`)
    #[must_use]
    pub fn select(mut self, expression: impl Into<String>) -> Self {
        self.kind = Kind::Select;
        self.select = vec![expression.into()];
        self
    }

    /// Add another selected expression
    #[must_use]
    pub fn add_select(mut self, expression: impl Into<String>) -> Self {
        self.select.push(expression.into());
        self
    }

    #[must_use]
    pub fn from(mut self, table: impl Into<String>, alias: impl Into<String>) -> Self {
        self.table = table.into();
        self.alias = Some(alias.into());
        self
    }

    #[must_use]
    pub fn insert(mut self, table: impl Into<String>) -> Self {
        self.kind = Kind::Insert;
        self.table = table.into();
        self.alias = None;
        self
    }

    /// Column to value-expression pairs for an INSERT, usually `?`
    #[must_use]
    pub fn values<I, C, E>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (C, E)>,
        C: Into<String>,
        E: Into<String>,
    {
        self.values = values
            .into_iter()
            .map(|(c, e)| (c.into(), e.into()))
            .collect();
        self
    }

    #[must_use]
    pub fn update(mut self, table: impl Into<String>, alias: impl Into<String>) -> Self {
        self.kind = Kind::Update;
        self.table = table.into();
        self.alias = Some(alias.into());
        self
    }

    /// `SET column = expression` for an UPDATE
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, expression: impl Into<String>) -> Self {
        self.sets.push((column.into(), expression.into()));
        self
    }

    #[must_use]
    pub fn delete(mut self, table: impl Into<String>, alias: impl Into<String>) -> Self {
        self.kind = Kind::Delete;
        self.table = table.into();
        self.alias = Some(alias.into());
        self
    }

    /// Replace every predicate with `predicate`
    #[must_use]
    pub fn where_clause(mut self, predicate: impl Into<String>) -> Self {
        self.predicates = vec![predicate.into()];
        self
    }

    /// AND another predicate onto the WHERE clause
    #[must_use]
    pub fn and_where(mut self, predicate: impl Into<String>) -> Self {
        self.predicates.push(predicate.into());
        self
    }

    /// Bind `value` to the placeholder at zero-based `index`
    #[must_use]
    pub fn set_parameter(mut self, index: usize, value: impl Into<Value>) -> Self {
        self.params.insert(index, value.into());
        self
    }

    /// Indices bound so far, ascending
    pub fn parameter_indices(&self) -> Vec<usize> {
        self.params.keys().copied().collect()
    }

    pub fn parameter(&self, index: usize) -> Option<&Value> {
        self.params.get(&index)
    }

    /// SQL text with `?` markers, before dialect rendering
    pub fn sql(&self) -> String {
        let mut sql = match self.kind {
            Kind::Select => format!("SELECT {} FROM {}", self.select.join(", "), self.table),
            Kind::Insert if self.values.is_empty() => {
                return self.dialect.empty_insert(&self.table)
            }
            Kind::Insert => {
                let (columns, exprs): (Vec<&str>, Vec<&str>) = self
                    .values
                    .iter()
                    .map(|(c, e)| (c.as_str(), e.as_str()))
                    .unzip();
                return format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    self.table,
                    columns.join(", "),
                    exprs.join(", ")
                );
            }
            Kind::Update => format!("UPDATE {}", self.table),
            Kind::Delete => format!("DELETE FROM {}", self.table),
        };

        if let Some(alias) = &self.alias {
            sql.push_str(" AS ");
            sql.push_str(alias);
        }

        if self.kind == Kind::Update {
            let sets: Vec<String> = self
                .sets
                .iter()
                .map(|(c, e)| format!("{} = {}", c, e))
                .collect();
            sql.push_str(" SET ");
            sql.push_str(&sets.join(", "));
        }

        match self.predicates.as_slice() {
            [] => {}
            [only] => {
                sql.push_str(" WHERE ");
                sql.push_str(only);
            }
            many => {
                let wrapped: Vec<String> = many.iter().map(|p| format!("({})", p)).collect();
                sql.push_str(" WHERE ");
                sql.push_str(&wrapped.join(" AND "));
            }
        }

        sql
    }

    /// Check parameter numbering and render for the dialect
    pub fn build(self) -> DbResult<Statement> {
        let sql = self.sql();
        let placeholders = count_placeholders(&sql);

        let contiguous = self.params.keys().enumerate().all(|(i, &index)| i == index);
        if !contiguous || self.params.len() != placeholders {
            return Err(DbError::ParameterMismatch {
                placeholders,
                bound: self.parameter_indices(),
            });
        }

        Ok(Statement {
            sql: self.dialect.render(&sql),
            params: self.params.into_values().collect(),
        })
    }
}

/// Finished statement: driver SQL plus parameters in binding order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    /// Statement from SQL already in the driver's placeholder syntax
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}
