//! Connection seam and its sqlx implementation

use crate::codec::{self, bind_params, UntypedNull};
use crate::{DbResult, Dialect, Row, Statement, Value};
use async_trait::async_trait;
use sqlx::mysql::MySqlConnection;
use sqlx::postgres::PgConnection;
use sqlx::sqlite::SqliteConnection;
use sqlx::{Connection, MySql, Postgres, Sqlite};
use tablekit_config::{DbConfig, Driver};
use tracing::{debug, instrument};

/// What [`crate::QueryHelper`] needs from a database connection
#[async_trait]
pub trait Backend: Send {
    /// SQL flavour used to render statements for this connection
    fn dialect(&self) -> Dialect;

    /// True when every table in `names` exists in the current schema
    async fn tables_exist(&mut self, names: &[&str]) -> DbResult<bool>;

    async fn fetch_all(&mut self, statement: &Statement) -> DbResult<Vec<Row>>;

    /// First row of the result, if any
    async fn fetch_optional(&mut self, statement: &Statement) -> DbResult<Option<Row>>;

    /// Run a write and return the affected row count
    async fn execute(&mut self, statement: &Statement) -> DbResult<u64>;

    /// Identifier generated by the last insert on this session
    async fn last_insert_id(&mut self) -> DbResult<i64>;
}

enum NativeConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    Sqlite(SqliteConnection),
}

/// Single native sqlx connection, engine chosen at runtime from the configured driver
pub struct SqlxBackend {
    conn: NativeConnection,
    dialect: Dialect,
}

impl SqlxBackend {
    /// Open one connection described by `config`
    #[instrument(skip(config), fields(driver = %config.driver, dbname = %config.dbname))]
    pub async fn connect(config: &DbConfig) -> DbResult<Self> {
        let url = config.connection_url()?;
        let conn = match config.driver {
            Driver::MySql => NativeConnection::MySql(MySqlConnection::connect(&url).await?),
            Driver::Postgres => NativeConnection::Postgres(PgConnection::connect(&url).await?),
            Driver::Sqlite => NativeConnection::Sqlite(SqliteConnection::connect(&url).await?),
        };
        debug!("Connection established");

        Ok(Self {
            conn,
            dialect: config.driver.into(),
        })
    }

    /// Test the connection
    pub async fn ping(&mut self) -> DbResult<()> {
        match &mut self.conn {
            NativeConnection::MySql(conn) => conn.ping().await?,
            NativeConnection::Postgres(conn) => conn.ping().await?,
            NativeConnection::Sqlite(conn) => conn.ping().await?,
        }
        Ok(())
    }

    /// Close the connection gracefully
    pub async fn close(self) -> DbResult<()> {
        match self.conn {
            NativeConnection::MySql(conn) => conn.close().await?,
            NativeConnection::Postgres(conn) => conn.close().await?,
            NativeConnection::Sqlite(conn) => conn.close().await?,
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for SqlxBackend {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn tables_exist(&mut self, names: &[&str]) -> DbResult<bool> {
        let sql = self.dialect.render(self.dialect.table_exists_sql());

        for name in names {
            let found: i64 = match &mut self.conn {
                NativeConnection::MySql(conn) => {
                    sqlx::query_scalar::<MySql, i64>(&sql)
                        .bind(*name)
                        .fetch_one(conn)
                        .await?
                }
                NativeConnection::Postgres(conn) => {
                    sqlx::query_scalar::<Postgres, i64>(&sql)
                        .bind(*name)
                        .fetch_one(conn)
                        .await?
                }
                NativeConnection::Sqlite(conn) => {
                    sqlx::query_scalar::<Sqlite, i64>(&sql)
                        .bind(*name)
                        .fetch_one(conn)
                        .await?
                }
            };
            if found == 0 {
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn fetch_all(&mut self, statement: &Statement) -> DbResult<Vec<Row>> {
        match &mut self.conn {
            NativeConnection::MySql(conn) => {
                let rows = bind_params!(MySql, statement, None::<String>)
                    .fetch_all(conn)
                    .await?;
                rows.iter().map(codec::mysql_row).collect()
            }
            NativeConnection::Postgres(conn) => {
                let rows = bind_params!(Postgres, statement, UntypedNull)
                    .fetch_all(conn)
                    .await?;
                rows.iter().map(codec::pg_row).collect()
            }
            NativeConnection::Sqlite(conn) => {
                let rows = bind_params!(Sqlite, statement, None::<String>)
                    .fetch_all(conn)
                    .await?;
                rows.iter().map(codec::sqlite_row).collect()
            }
        }
    }

    async fn fetch_optional(&mut self, statement: &Statement) -> DbResult<Option<Row>> {
        match &mut self.conn {
            NativeConnection::MySql(conn) => {
                let row = bind_params!(MySql, statement, None::<String>)
                    .fetch_optional(conn)
                    .await?;
                row.as_ref().map(codec::mysql_row).transpose()
            }
            NativeConnection::Postgres(conn) => {
                let row = bind_params!(Postgres, statement, UntypedNull)
                    .fetch_optional(conn)
                    .await?;
                row.as_ref().map(codec::pg_row).transpose()
            }
            NativeConnection::Sqlite(conn) => {
                let row = bind_params!(Sqlite, statement, None::<String>)
                    .fetch_optional(conn)
                    .await?;
                row.as_ref().map(codec::sqlite_row).transpose()
            }
        }
    }

    async fn execute(&mut self, statement: &Statement) -> DbResult<u64> {
        let affected = match &mut self.conn {
            NativeConnection::MySql(conn) => bind_params!(MySql, statement, None::<String>)
                .execute(conn)
                .await?
                .rows_affected(),
            NativeConnection::Postgres(conn) => bind_params!(Postgres, statement, UntypedNull)
                .execute(conn)
                .await?
                .rows_affected(),
            NativeConnection::Sqlite(conn) => bind_params!(Sqlite, statement, None::<String>)
                .execute(conn)
                .await?
                .rows_affected(),
        };
        Ok(affected)
    }

    async fn last_insert_id(&mut self) -> DbResult<i64> {
        let sql = self.dialect.last_insert_id_sql();
        let id = match &mut self.conn {
            NativeConnection::MySql(conn) => {
                sqlx::query_scalar::<MySql, i64>(sql).fetch_one(conn).await?
            }
            NativeConnection::Postgres(conn) => {
                sqlx::query_scalar::<Postgres, i64>(sql).fetch_one(conn).await?
            }
            NativeConnection::Sqlite(conn) => {
                sqlx::query_scalar::<Sqlite, i64>(sql).fetch_one(conn).await?
            }
        };
        Ok(id)
    }
}
