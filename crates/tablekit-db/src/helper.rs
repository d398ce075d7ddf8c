//! Generic CRUD operations over any table

use crate::{
    count_placeholders, validate_identifier, Backend, Columns, Conditions, DbError, DbResult,
    Dialect, QueryBuilder, Row, SqlxBackend, Statement,
};
use tablekit_config::DbConfig;
use tracing::{debug, instrument};

/// Alias every generated SELECT, UPDATE and DELETE gives its table
pub const TABLE_ALIAS: &str = "t";

/// Attach `conditions` as the WHERE clause of `qb`.
///
/// The first condition becomes the WHERE predicate and the rest are AND-ed on,
/// in iteration order, each prefixed with the table alias. Condition `i` is
/// bound at parameter index `base_offset + i`; an UPDATE passes its SET column
/// count so its WHERE values follow the SET values.
pub fn apply_conditions(
    mut qb: QueryBuilder,
    conditions: &Conditions,
    base_offset: usize,
) -> DbResult<QueryBuilder> {
    for (i, (expression, value)) in conditions.iter().enumerate() {
        if count_placeholders(expression) != 1 {
            return Err(DbError::InvalidCondition(expression.to_string()));
        }

        let predicate = format!("{}.{}", TABLE_ALIAS, expression);
        qb = if i == 0 {
            qb.where_clause(predicate)
        } else {
            qb.and_where(predicate)
        };
        qb = qb.set_parameter(base_offset + i, value.clone());
    }

    Ok(qb)
}

/// CRUD helper owning one database connection
pub struct QueryHelper<B = SqlxBackend> {
    backend: B,
}

impl QueryHelper<SqlxBackend> {
    /// Connect with an explicit configuration
    pub async fn connect(config: &DbConfig) -> DbResult<Self> {
        let backend = SqlxBackend::connect(config).await?;
        Ok(Self { backend })
    }

    /// Load and validate configuration from file and environment, then connect.
    ///
    /// Configuration problems are reported before any connection attempt.
    pub async fn from_env() -> DbResult<Self> {
        let config = DbConfig::from_env()?;
        Self::connect(&config).await
    }

    /// Round-trip to the server to confirm the connection is alive
    pub async fn ping(&mut self) -> DbResult<()> {
        self.backend.ping().await
    }

    /// Close the connection gracefully
    pub async fn close(self) -> DbResult<()> {
        self.backend.close().await
    }
}

impl<B: Backend> QueryHelper<B> {
    pub fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn dialect(&self) -> Dialect {
        self.backend.dialect()
    }

    /// Fresh builder for this connection's dialect
    pub fn query_builder(&self) -> QueryBuilder {
        QueryBuilder::new(self.dialect())
    }

    #[instrument(skip(self))]
    pub async fn table_exists(&mut self, table: &str) -> DbResult<bool> {
        self.backend.tables_exist(&[table]).await
    }

    /// True only if every table in `tables` exists
    #[instrument(skip(self))]
    pub async fn tables_exist(&mut self, tables: &[&str]) -> DbResult<bool> {
        self.backend.tables_exist(tables).await
    }

    /// Number of rows in `table` matching `conditions`
    #[instrument(skip(self, conditions))]
    pub async fn count(&mut self, table: &str, conditions: &Conditions) -> DbResult<u64> {
        validate_identifier(table)?;

        let qb = self.query_builder().select("COUNT(*)").from(table, TABLE_ALIAS);
        let stmt = apply_conditions(qb, conditions, 0)?.build()?;

        let row = self.backend.fetch_optional(&stmt).await?;
        let count = row
            .as_ref()
            .and_then(|r| r.values().next())
            .and_then(|v| v.as_i64())
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| DbError::Decode {
                column: "COUNT(*)".to_string(),
                message: "expected a non-negative integer".to_string(),
            })?;

        debug!(table, count, "Counted rows");
        Ok(count)
    }

    /// All rows of `table` matching `conditions`; no conditions means every row
    #[instrument(skip(self, conditions))]
    pub async fn find(&mut self, table: &str, conditions: &Conditions) -> DbResult<Vec<Row>> {
        validate_identifier(table)?;

        let qb = self
            .query_builder()
            .select(format!("{}.*", TABLE_ALIAS))
            .from(table, TABLE_ALIAS);
        let stmt = apply_conditions(qb, conditions, 0)?.build()?;

        let rows = self.backend.fetch_all(&stmt).await?;
        debug!(table, rows = rows.len(), "Fetched rows");
        Ok(rows)
    }

    /// `column` of the first matching row, or `None` when nothing matches
    #[instrument(skip(self, conditions))]
    pub async fn column_value(
        &mut self,
        table: &str,
        column: &str,
        conditions: &Conditions,
    ) -> DbResult<Option<Row>> {
        validate_identifier(table)?;
        validate_identifier(column)?;

        let qb = self
            .query_builder()
            .select(format!("{}.{}", TABLE_ALIAS, column))
            .from(table, TABLE_ALIAS);
        let stmt = apply_conditions(qb, conditions, 0)?.build()?;

        self.backend.fetch_optional(&stmt).await
    }

    /// Insert one row; values are bound from index 0 in column order
    #[instrument(skip(self, columns))]
    pub async fn insert(&mut self, table: &str, columns: &Columns) -> DbResult<u64> {
        validate_identifier(table)?;

        let mut qb = self.query_builder().insert(table);
        let mut placeholders = Vec::with_capacity(columns.len());
        for (i, (column, value)) in columns.iter().enumerate() {
            validate_identifier(column)?;
            placeholders.push((column, "?"));
            qb = qb.set_parameter(i, value.clone());
        }
        let stmt = qb.values(placeholders).build()?;

        let affected = self.backend.execute(&stmt).await?;
        debug!(table, affected, "Inserted row");
        Ok(affected)
    }

    /// Id generated by the most recent insert on this connection
    #[instrument(skip(self))]
    pub async fn last_inserted_id(&mut self) -> DbResult<i64> {
        self.backend.last_insert_id().await
    }

    /// Update matching rows.
    ///
    /// SET values take indices `0..columns.len()`; WHERE values continue from
    /// `columns.len()`.
    #[instrument(skip(self, columns, conditions))]
    pub async fn update(
        &mut self,
        table: &str,
        columns: &Columns,
        conditions: &Conditions,
    ) -> DbResult<u64> {
        validate_identifier(table)?;

        let mut qb = self.query_builder().update(table, TABLE_ALIAS);
        for (i, (column, value)) in columns.iter().enumerate() {
            validate_identifier(column)?;
            qb = qb.set(column, "?").set_parameter(i, value.clone());
        }
        let stmt = apply_conditions(qb, conditions, columns.len())?.build()?;

        let affected = self.backend.execute(&stmt).await?;
        debug!(table, affected, "Updated rows");
        Ok(affected)
    }

    /// Delete matching rows; conditions are bound from index 0
    #[instrument(skip(self, conditions))]
    pub async fn delete(&mut self, table: &str, conditions: &Conditions) -> DbResult<u64> {
        validate_identifier(table)?;

        let qb = self.query_builder().delete(table, TABLE_ALIAS);
        let stmt = apply_conditions(qb, conditions, 0)?.build()?;

        let affected = self.backend.execute(&stmt).await?;
        debug!(table, affected, "Deleted rows");
        Ok(affected)
    }

    /// Run a caller-built SELECT
    pub async fn fetch_all(&mut self, qb: QueryBuilder) -> DbResult<Vec<Row>> {
        let stmt = qb.build()?;
        self.backend.fetch_all(&stmt).await
    }

    /// Run a caller-built write
    pub async fn execute(&mut self, qb: QueryBuilder) -> DbResult<u64> {
        let stmt = qb.build()?;
        self.backend.execute(&stmt).await
    }

    /// Run a statement already in driver syntax (DDL, vendor-specific SQL)
    pub async fn execute_statement(&mut self, statement: &Statement) -> DbResult<u64> {
        self.backend.execute(statement).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Records every statement and answers from canned results
    struct RecordingBackend {
        dialect: Dialect,
        statements: Vec<Statement>,
        rows: VecDeque<Vec<Row>>,
        tables: Vec<String>,
        affected: u64,
    }

    impl RecordingBackend {
        fn new(dialect: Dialect) -> Self {
            Self {
                dialect,
                statements: Vec::new(),
                rows: VecDeque::new(),
                tables: Vec::new(),
                affected: 1,
            }
        }

        fn last(&self) -> &Statement {
            self.statements.last().expect("no statement recorded")
        }
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        fn dialect(&self) -> Dialect {
            self.dialect
        }

        async fn tables_exist(&mut self, names: &[&str]) -> DbResult<bool> {
            Ok(names
                .iter()
                .all(|n| self.tables.iter().any(|t| t.eq_ignore_ascii_case(n))))
        }

        async fn fetch_all(&mut self, statement: &Statement) -> DbResult<Vec<Row>> {
            self.statements.push(statement.clone());
            Ok(self.rows.pop_front().unwrap_or_default())
        }

        async fn fetch_optional(&mut self, statement: &Statement) -> DbResult<Option<Row>> {
            self.statements.push(statement.clone());
            Ok(self.rows.pop_front().and_then(|rows| rows.into_iter().next()))
        }

        async fn execute(&mut self, statement: &Statement) -> DbResult<u64> {
            self.statements.push(statement.clone());
            Ok(self.affected)
        }

        async fn last_insert_id(&mut self) -> DbResult<i64> {
            Ok(42)
        }
    }

    fn helper(dialect: Dialect) -> QueryHelper<RecordingBackend> {
        QueryHelper::with_backend(RecordingBackend::new(dialect))
    }

    #[test]
    fn test_conditions_bound_from_offset_in_order() {
        let conditions = Conditions::new()
            .with("a = ?", 1)
            .with("b > ?", 2)
            .with("c LIKE ?", "x%");
        let qb = QueryBuilder::new(Dialect::MySql)
            .select("t.*")
            .from("items", "t");

        let qb = apply_conditions(qb, &conditions, 3).unwrap();

        assert_eq!(qb.parameter_indices(), vec![3, 4, 5]);
        assert_eq!(qb.parameter(5), Some(&Value::from("x%")));
        insta::assert_snapshot!(qb.sql(), @"SELECT t.* FROM items AS t WHERE (t.a = ?) AND (t.b > ?) AND (t.c LIKE ?)");
    }

    #[test]
    fn test_condition_needs_one_placeholder() {
        let qb = QueryBuilder::new(Dialect::MySql);
        for bad in ["id = 5", "id BETWEEN ? AND ?"] {
            let conditions = Conditions::new().with(bad, 1);
            assert!(matches!(
                apply_conditions(qb.clone(), &conditions, 0),
                Err(DbError::InvalidCondition(expr)) if expr == bad
            ));
        }
    }

    #[tokio::test]
    async fn test_update_binds_where_after_set_values() {
        let mut h = helper(Dialect::MySql);
        let columns = Columns::from([("a", 1), ("b", 2)]);
        let conditions = Conditions::from([("id = ?", 5)]);

        let affected = h.update("items", &columns, &conditions).await.unwrap();

        assert_eq!(affected, 1);
        let stmt = h.backend().last();
        assert_eq!(stmt.sql(), "UPDATE items AS t SET a = ?, b = ? WHERE t.id = ?");
        assert_eq!(
            stmt.params(),
            &[Value::Integer(1), Value::Integer(2), Value::Integer(5)]
        );
    }

    #[tokio::test]
    async fn test_update_on_postgres_numbers_in_binding_order() {
        let mut h = helper(Dialect::Postgres);
        let columns = Columns::new().with("name", "ada").with("age", 37);
        let conditions = Conditions::new().with("id = ?", 9).with("version = ?", 3);

        h.update("people", &columns, &conditions).await.unwrap();

        let stmt = h.backend().last();
        assert_eq!(
            stmt.sql(),
            "UPDATE people AS t SET name = $1, age = $2 WHERE (t.id = $3) AND (t.version = $4)"
        );
        assert_eq!(stmt.params().len(), 4);
        assert_eq!(stmt.params()[2], Value::Integer(9));
    }

    #[tokio::test]
    async fn test_insert_binds_from_zero() {
        let mut h = helper(Dialect::Sqlite);
        let columns = Columns::new()
            .with("name", "ada")
            .with("note", None::<String>);

        h.insert("people", &columns).await.unwrap();

        let stmt = h.backend().last();
        assert_eq!(stmt.sql(), "INSERT INTO people (name, note) VALUES (?, ?)");
        assert_eq!(stmt.params(), &[Value::from("ada"), Value::Null]);
        assert_eq!(h.last_inserted_id().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_insert_with_no_columns() {
        let mut h = helper(Dialect::Sqlite);
        h.insert("events", &Columns::new()).await.unwrap();

        let stmt = h.backend().last();
        assert_eq!(stmt.sql(), "INSERT INTO events DEFAULT VALUES");
        assert!(stmt.params().is_empty());
    }

    #[tokio::test]
    async fn test_find_without_conditions_has_no_where() {
        let mut h = helper(Dialect::MySql);
        let row: Row = [("id", 1)].into_iter().collect();
        h.backend_mut().rows.push_back(vec![row.clone()]);

        let rows = h.find("people", &Conditions::new()).await.unwrap();

        assert_eq!(rows, vec![row]);
        assert_eq!(h.backend().last().sql(), "SELECT t.* FROM people AS t");
    }

    #[tokio::test]
    async fn test_column_value_no_match_is_none() {
        let mut h = helper(Dialect::MySql);
        let conditions = Conditions::from([("email = ?", "nobody@example.com")]);

        let found = h.column_value("people", "name", &conditions).await.unwrap();

        assert!(found.is_none());
        assert_eq!(
            h.backend().last().sql(),
            "SELECT t.name FROM people AS t WHERE t.email = ?"
        );
    }

    #[tokio::test]
    async fn test_count_reads_aggregate() {
        let mut h = helper(Dialect::MySql);
        let row: Row = [("COUNT(*)", 3)].into_iter().collect();
        h.backend_mut().rows.push_back(vec![row]);

        let n = h
            .count("people", &Conditions::from([("age > ?", 30)]))
            .await
            .unwrap();

        assert_eq!(n, 3);
        assert_eq!(
            h.backend().last().sql(),
            "SELECT COUNT(*) FROM people AS t WHERE t.age > ?"
        );
    }

    #[tokio::test]
    async fn test_delete_binds_from_zero() {
        let mut h = helper(Dialect::Sqlite);
        let conditions = Conditions::from([("id = ?", 7), ("owner = ?", 2)]);

        h.delete("people", &conditions).await.unwrap();

        let stmt = h.backend().last();
        assert_eq!(
            stmt.sql(),
            "DELETE FROM people AS t WHERE (t.id = ?) AND (t.owner = ?)"
        );
        assert_eq!(stmt.params(), &[Value::Integer(7), Value::Integer(2)]);
    }

    #[tokio::test]
    async fn test_bad_identifiers_never_reach_backend() {
        let mut h = helper(Dialect::MySql);

        let err = h
            .find("people; DROP TABLE people", &Conditions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidIdentifier(_)));

        let err = h
            .insert("people", &Columns::from([("name) VALUES (1); --", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidIdentifier(_)));

        assert!(h.backend().statements.is_empty());
    }

    #[tokio::test]
    async fn test_table_exists_delegates() {
        let mut h = helper(Dialect::Sqlite);
        h.backend_mut().tables.push("people".into());

        assert!(h.table_exists("PEOPLE").await.unwrap());
        assert!(!h.table_exists("nonexistent_table").await.unwrap());
        assert!(!h.tables_exist(&["people", "pets"]).await.unwrap());
    }
}
