use crate::error::CommonError;
use crate::libsql::{Connection, Migrations, run_migrations};

/// Build an in-memory database with the given migration sets applied, in the
/// same order the server applies them at startup.
pub async fn setup_in_memory_database(
    migrations: Vec<Migrations>,
) -> Result<(libsql::Database, Connection), CommonError> {
    let db = libsql::Builder::new_local(":memory:").build().await?;
    let conn = Connection::new(db.connect()?);

    // Enable foreign key constraints
    conn.execute("PRAGMA foreign_keys = ON", ()).await?;

    for set in &migrations {
        run_migrations(&conn, set).await?;
    }

    Ok((db, conn))
}
