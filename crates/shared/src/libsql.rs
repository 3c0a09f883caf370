use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::Path;

use libsql::params::IntoParams;
use libsql::{BatchRows, Rows, Transaction, TransactionBehavior};

use crate::error::CommonError;

/// Embedded SQL migrations, keyed by filename. Filenames follow the
/// `NNNN_name.up.sql` / `NNNN_name.down.sql` convention; only `.up.`
/// files are applied.
pub type Migrations = BTreeMap<&'static str, &'static str>;

/// Implemented by repositories that carry their own embedded migrations.
pub trait SqlMigrationLoader {
    fn load_sql_migrations() -> Migrations;
}

#[derive(Debug, Clone)]
pub struct Connection(pub libsql::Connection);

impl Connection {
    pub fn new(connection: libsql::Connection) -> Self {
        Self(connection)
    }
}

impl Deref for Connection {
    type Target = libsql::Connection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[macro_export]
macro_rules! execute_with_retry {
    ($operation:expr) => {
        execute_with_retry!($operation, 10)
    };
    ($operation:expr, $max_retries:expr) => {{
        async {
            let mut _retries = 0u32;
            let _max_retries: u32 = $max_retries;

            loop {
                match $operation.await {
                    Ok(result) => break Ok(result),
                    Err(err) => {
                        let err_str = err.to_string();
                        if err_str.contains("database is locked") || err_str.contains("SQLITE_BUSY")
                        {
                            tracing::warn!("Database is locked, retrying... {:?}", err);
                            if _retries >= _max_retries {
                                break Err(err);
                            }

                            _retries += 1;

                            // Very low delay with exponential backoff
                            let delay_us = 10_000 * (1 << _retries.min(6));
                            tokio::time::sleep(std::time::Duration::from_micros(delay_us)).await;
                        } else {
                            tracing::error!("Error executing with retry: {:?}", err);
                            break Err(err);
                        }
                    }
                }
            }
        }
        .await
    }};
}

impl Connection {
    /// Execute a statement, retrying on SQLITE_BUSY, returning the number of
    /// affected rows.
    pub async fn execute(&self, sql: &str, params: impl IntoParams) -> libsql::Result<u64> {
        tracing::trace!("executing `{}`", sql);
        let params = params.into_params()?;
        execute_with_retry!(self.0.execute(sql, params.clone()), 10)
    }

    /// Execute a batch of statements.
    pub async fn execute_batch(&self, sql: &str) -> libsql::Result<BatchRows> {
        tracing::trace!("executing batch `{}`", sql);
        execute_with_retry!(self.0.execute_batch(sql), 10)
    }

    /// Run a query, retrying on SQLITE_BUSY, returning the rows.
    pub async fn query(&self, sql: &str, params: impl IntoParams) -> libsql::Result<Rows> {
        let stmt = self.prepare(sql).await?;
        let params = params.into_params()?;
        execute_with_retry!(stmt.query(params.clone()), 10)
    }

    /// Begin an IMMEDIATE transaction, taking the write lock up front so
    /// read-validate-write sequences are serialized against other writers.
    /// The transaction rolls back on drop unless committed.
    pub async fn begin_immediate(&self) -> libsql::Result<Transaction> {
        execute_with_retry!(
            self.0.transaction_with_behavior(TransactionBehavior::Immediate),
            10
        )
    }
}

/// Open a local database file and return a connection with foreign keys on.
pub async fn connect_local(path: &Path) -> Result<(libsql::Database, Connection), CommonError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = libsql::Builder::new_local(path).build().await?;
    let conn = Connection::new(db.connect()?);
    conn.execute("PRAGMA foreign_keys = ON", ()).await?;
    Ok((db, conn))
}

/// Apply every `.up.` migration in filename order.
pub async fn run_migrations(
    conn: &Connection,
    migrations: &Migrations,
) -> Result<(), CommonError> {
    for (filename, contents) in migrations {
        if !filename.contains(".up.") {
            continue;
        }
        tracing::debug!(migration = %filename, "Applying migration");
        conn.execute_batch(contents).await?;
    }
    Ok(())
}
