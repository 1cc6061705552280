//! Embedded schema migrations
//!
//! SQL files under `migrations/` are compiled in and applied on open.
//! Refinery records what has run in `refinery_schema_history`.

use rexpet_core::CoreError;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

pub(crate) fn run_migrations(conn: &mut rusqlite::Connection) -> Result<(), CoreError> {
    let report = embedded::migrations::runner()
        .run(conn)
        .map_err(|e| CoreError::Persistence(format!("migration failed: {e}")))?;

    for migration in report.applied_migrations() {
        tracing::info!(version = migration.version(), name = %migration.name(), "Applied migration");
    }
    Ok(())
}
