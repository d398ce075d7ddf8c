//! Per-engine SQL differences: placeholder syntax, empty inserts, introspection

use crate::{DbError, DbResult};
use tablekit_config::Driver;

/// SQL flavour spoken by a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySql,
    Postgres,
    Sqlite,
}

impl From<Driver> for Dialect {
    fn from(driver: Driver) -> Self {
        match driver {
            Driver::MySql => Dialect::MySql,
            Driver::Postgres => Dialect::Postgres,
            Driver::Sqlite => Dialect::Sqlite,
        }
    }
}

impl Dialect {
    /// Turn builder SQL (`?` markers) into driver SQL.
    ///
    /// PostgreSQL numbers its parameters, so the n-th `?` outside a quoted
    /// literal becomes `$n`. Other engines take `?` as is.
    pub fn render(self, sql: &str) -> String {
        match self {
            Dialect::MySql | Dialect::Sqlite => sql.to_string(),
            Dialect::Postgres => {
                let mut out = String::with_capacity(sql.len() + 8);
                let mut last = 0;
                for (n, pos) in placeholder_positions(sql).into_iter().enumerate() {
                    out.push_str(&sql[last..pos]);
                    out.push('$');
                    out.push_str(&(n + 1).to_string());
                    last = pos + 1;
                }
                out.push_str(&sql[last..]);
                out
            }
        }
    }

    /// INSERT with no explicit columns
    pub fn empty_insert(self, table: &str) -> String {
        match self {
            Dialect::MySql => format!("INSERT INTO {} () VALUES ()", table),
            Dialect::Postgres | Dialect::Sqlite => format!("INSERT INTO {} DEFAULT VALUES", table),
        }
    }

    /// Count of tables named `?` (case-insensitive) in the current schema
    pub fn table_exists_sql(self) -> &'static str {
        match self {
            Dialect::MySql => {
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND LOWER(table_name) = LOWER(?)"
            }
            Dialect::Postgres => {
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND LOWER(table_name) = LOWER(?)"
            }
            Dialect::Sqlite => {
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND LOWER(name) = LOWER(?)"
            }
        }
    }

    /// Session-local id generated by the last insert
    pub fn last_insert_id_sql(self) -> &'static str {
        match self {
            // LAST_INSERT_ID() is BIGINT UNSIGNED, which does not decode as i64
            Dialect::MySql => "SELECT CAST(LAST_INSERT_ID() AS SIGNED)",
            Dialect::Postgres => "SELECT lastval()",
            Dialect::Sqlite => "SELECT last_insert_rowid()",
        }
    }
}

/// Byte offsets of `?` markers outside single, double or backtick quotes
fn placeholder_positions(sql: &str) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut quote: Option<char> = None;

    for (i, c) in sql.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '?' => positions.push(i),
                _ => {}
            },
        }
    }

    positions
}

/// Number of positional placeholders in `sql`
pub fn count_placeholders(sql: &str) -> usize {
    placeholder_positions(sql).len()
}

/// Accept `name` or `schema.name` made of `[A-Za-z_][A-Za-z0-9_$]*` parts.
///
/// Table and column names are spliced into SQL text, so anything else is
/// refused before a statement is built.
pub fn validate_identifier(name: &str) -> DbResult<()> {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    };

    if !name.is_empty() && name.split('.').all(valid_part) {
        Ok(())
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_numbers_placeholders() {
        let sql = "UPDATE users AS t SET name = ?, age = ? WHERE t.id = ?";
        assert_eq!(
            Dialect::Postgres.render(sql),
            "UPDATE users AS t SET name = $1, age = $2 WHERE t.id = $3"
        );
        assert_eq!(Dialect::MySql.render(sql), sql);
    }

    #[test]
    fn test_quoted_question_marks_are_not_placeholders() {
        let sql = "SELECT t.* FROM faq AS t WHERE t.q = 'why?' AND t.id = ?";
        assert_eq!(count_placeholders(sql), 1);
        assert_eq!(
            Dialect::Postgres.render(sql),
            "SELECT t.* FROM faq AS t WHERE t.q = 'why?' AND t.id = $1"
        );
        assert_eq!(count_placeholders("t.note = 'it''s ?' OR t.x = ?"), 1);
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("app.users").is_ok());
        assert!(validate_identifier("_tmp$1").is_ok());

        for bad in ["", "1users", "users;drop", "a..b", "user name", "t.*"] {
            assert!(
                matches!(validate_identifier(bad), Err(DbError::InvalidIdentifier(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_empty_insert_per_dialect() {
        assert_eq!(Dialect::MySql.empty_insert("log"), "INSERT INTO log () VALUES ()");
        assert_eq!(Dialect::Sqlite.empty_insert("log"), "INSERT INTO log DEFAULT VALUES");
    }

    #[test]
    fn test_dialect_from_driver() {
        assert_eq!(Dialect::from(Driver::Postgres), Dialect::Postgres);
    }
}
