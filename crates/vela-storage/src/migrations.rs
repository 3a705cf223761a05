// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded database migrations using refinery.
//!
//! SQL files under `migrations/` are compiled into the binary by
//! `embed_migrations!` and applied on every [`crate::Database`] open.

use vela_core::VelaError;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Apply all pending migrations.
///
/// Refinery tracks applied versions in `refinery_schema_history`, so
/// reopening an existing database is a no-op.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<usize, VelaError> {
    let report = embedded::migrations::runner()
        .run(conn)
        .map_err(|e| VelaError::Storage {
            source: Box::new(e),
        })?;
    Ok(report.applied_migrations().len())
}
