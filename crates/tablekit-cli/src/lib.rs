//! Command-line front end over [`QueryHelper`]
//!
//! Conditions given on the command line are column equalities: `-w age=36`
//! becomes the predicate `age = ?` bound to `36`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use tablekit_config::{AppConfig, DbConfig};
use tablekit_db::{Backend, Columns, Conditions, DbResult, QueryHelper, Value};

#[derive(Debug, Parser)]
#[command(name = "tablekit", version, about = "Generic CRUD over any SQL table")]
pub struct Cli {
    /// TOML file with a [database] table (defaults to $TABLEKIT_CONFIG or tablekit.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print whether a table exists
    Exists { table: String },

    /// Count matching rows
    Count {
        table: String,
        #[arg(short = 'w', long = "where", value_parser = parse_assignment)]
        conditions: Vec<(String, Value)>,
    },

    /// Print matching rows as JSON lines
    Find {
        table: String,
        #[arg(short = 'w', long = "where", value_parser = parse_assignment)]
        conditions: Vec<(String, Value)>,
    },

    /// Print one column of the first matching row, or null
    Get {
        table: String,
        column: String,
        #[arg(short = 'w', long = "where", value_parser = parse_assignment)]
        conditions: Vec<(String, Value)>,
    },

    /// Insert one row
    Insert {
        table: String,
        #[arg(short = 's', long = "set", value_parser = parse_assignment)]
        columns: Vec<(String, Value)>,
        /// Also print the id generated by the insert
        #[arg(long)]
        id: bool,
    },

    /// Update matching rows
    Update {
        table: String,
        #[arg(short = 's', long = "set", value_parser = parse_assignment, required = true)]
        columns: Vec<(String, Value)>,
        #[arg(short = 'w', long = "where", value_parser = parse_assignment)]
        conditions: Vec<(String, Value)>,
    },

    /// Delete matching rows (at least one condition required)
    Delete {
        table: String,
        #[arg(short = 'w', long = "where", value_parser = parse_assignment, required = true)]
        conditions: Vec<(String, Value)>,
    },
}

impl Cli {
    /// Resolve the database configuration: file first, then TABLEKIT_DB_* overrides
    pub fn db_config(&self) -> Result<DbConfig> {
        let app = match &self.config {
            Some(path) => AppConfig::from_path(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            None => AppConfig::load().context("failed to read configuration")?,
        };

        let config = app
            .with_env_overrides()?
            .db_config()
            .context("database configuration incomplete")?;
        Ok(config)
    }
}

/// Parse `key=value`; the key may not be empty
pub fn parse_assignment(s: &str) -> Result<(String, Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in {:?}", s));
    }
    Ok((key.to_string(), parse_value(value)))
}

/// Integer, then float, then `true`/`false`/`null`, else text
pub fn parse_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Value::Float(f);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => Value::Text(raw.to_string()),
    }
}

/// `column=value` pairs become `column = ?` predicates
pub fn equality_conditions(pairs: Vec<(String, Value)>) -> Conditions {
    pairs
        .into_iter()
        .map(|(column, value)| (format!("{} = ?", column), value))
        .collect()
}

/// Execute one command, writing its output to `out`
pub async fn run<B, W>(helper: &mut QueryHelper<B>, command: Command, out: &mut W) -> Result<()>
where
    B: Backend,
    W: Write,
{
    match command {
        Command::Exists { table } => {
            let exists = helper.table_exists(&table).await?;
            writeln!(out, "{}", exists)?;
        }
        Command::Count { table, conditions } => {
            let n = helper
                .count(&table, &equality_conditions(conditions))
                .await?;
            writeln!(out, "{}", n)?;
        }
        Command::Find { table, conditions } => {
            let rows = helper.find(&table, &equality_conditions(conditions)).await?;
            for row in rows {
                writeln!(out, "{}", serde_json::to_string(&row)?)?;
            }
        }
        Command::Get {
            table,
            column,
            conditions,
        } => {
            let row = helper
                .column_value(&table, &column, &equality_conditions(conditions))
                .await?;
            writeln!(out, "{}", serde_json::to_string(&row)?)?;
        }
        Command::Insert { table, columns, id } => {
            let columns: Columns = columns.into_iter().collect();
            let affected = helper.insert(&table, &columns).await?;
            if id {
                let last = helper
                    .last_inserted_id()
                    .await
                    .context("insert succeeded but the driver reported no id")?;
                writeln!(out, "{}", json!({ "affected": affected, "id": last }))?;
            } else {
                writeln!(out, "{}", json!({ "affected": affected }))?;
            }
        }
        Command::Update {
            table,
            columns,
            conditions,
        } => {
            let columns: Columns = columns.into_iter().collect();
            let affected = helper
                .update(&table, &columns, &equality_conditions(conditions))
                .await?;
            writeln!(out, "{}", json!({ "affected": affected }))?;
        }
        Command::Delete { table, conditions } => {
            let affected = helper
                .delete(&table, &equality_conditions(conditions))
                .await?;
            writeln!(out, "{}", json!({ "affected": affected }))?;
        }
    }

    Ok(())
}

/// Combine a command outcome with the outcome of closing the connection.
/// A failed command outranks a failed close.
pub fn finish_session(result: Result<()>, closed: DbResult<()>) -> Result<()> {
    result?;
    closed.context("Failed to close connection")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_typed() {
        assert_eq!(parse_value("42"), Value::Integer(42));
        assert_eq!(parse_value("-1.25"), Value::Float(-1.25));
        assert_eq!(parse_value("true"), Value::Bool(true));
        assert_eq!(parse_value("null"), Value::Null);
        assert_eq!(parse_value("NaN"), Value::Text("NaN".into()));
        assert_eq!(parse_value("ada lovelace"), Value::from("ada lovelace"));
        assert_eq!(parse_value(""), Value::from(""));
    }

    #[test]
    fn assignment_splits_on_first_equals() {
        assert_eq!(
            parse_assignment("note=a=b").unwrap(),
            ("note".to_string(), Value::from("a=b"))
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=5").is_err());
    }

    #[test]
    fn equality_conditions_keep_order() {
        let conditions =
            equality_conditions(vec![("b".into(), Value::Integer(1)), ("a".into(), Value::Null)]);
        let keys: Vec<_> = conditions.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b = ?", "a = ?"]);
    }

    #[test]
    fn parses_update_command() {
        let cli = Cli::try_parse_from([
            "tablekit", "update", "people", "-s", "age=37", "-w", "id=1", "--config", "x.toml",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        match cli.command {
            Command::Update {
                table,
                columns,
                conditions,
            } => {
                assert_eq!(table, "people");
                assert_eq!(columns, vec![("age".to_string(), Value::Integer(37))]);
                assert_eq!(conditions, vec![("id".to_string(), Value::Integer(1))]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn command_error_survives_failed_close() {
        let closed = Err(tablekit_db::DbError::InvalidIdentifier("close".into()));
        let err = finish_session(Err(anyhow::anyhow!("no such table: ghosts")), closed)
            .unwrap_err();
        assert_eq!(err.to_string(), "no such table: ghosts");

        let closed = Err(tablekit_db::DbError::InvalidIdentifier("close".into()));
        let err = finish_session(Ok(()), closed).unwrap_err();
        assert_eq!(err.to_string(), "Failed to close connection");

        assert!(finish_session(Ok(()), Ok(())).is_ok());
    }

    #[test]
    fn delete_requires_a_condition() {
        assert!(Cli::try_parse_from(["tablekit", "delete", "people"]).is_err());
    }
}
