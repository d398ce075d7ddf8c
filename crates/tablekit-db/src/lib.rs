//! Generic table access over a single SQL connection
//!
//! [`QueryHelper`] offers existence checks, counting, selects, inserts,
//! updates and deletes against any table, using column/value maps and
//! predicate maps instead of per-table schema types. Statements are built by
//! [`QueryBuilder`] with positional parameters and executed through a
//! [`Backend`] (one native sqlx connection per engine in production).

pub mod backend;
pub mod builder;
mod codec;
pub mod dialect;
pub mod helper;
pub mod value;

pub use backend::*;
pub use builder::*;
pub use dialect::*;
pub use helper::*;
pub use value::*;

pub use tablekit_config::{ConfigError, DbConfig, Driver};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Database driver error: {0}")]
    Driver(#[from] sqlx::Error),

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Condition {0:?} must contain exactly one `?` placeholder")]
    InvalidCondition(String),

    #[error("Statement has {placeholders} placeholders but parameters are bound at {bound:?}")]
    ParameterMismatch {
        placeholders: usize,
        bound: Vec<usize>,
    },

    #[error("Cannot decode column {column:?}: {message}")]
    Decode { column: String, message: String },
}

pub type DbResult<T> = Result<T, DbError>;
