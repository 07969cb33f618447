//! Versioned schema. Each entry of [`MIGRATIONS`] moves the database one
//! `PRAGMA user_version` forward; entries are never edited once shipped.

use rusqlite::Connection;

pub(crate) const MIGRATIONS: &[&str] = &[
    // v1: detections, known faces, notifications
    r#"
    CREATE TABLE IF NOT EXISTS detections (
        id TEXT PRIMARY KEY NOT NULL,
        body TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS known_faces (
        id TEXT PRIMARY KEY NOT NULL,
        body TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY NOT NULL,
        body TEXT NOT NULL
    );
    "#,
    // v2: detection settings
    r#"
    CREATE TABLE IF NOT EXISTS settings (
        id TEXT PRIMARY KEY NOT NULL,
        body TEXT NOT NULL
    );
    "#,
];

pub(crate) const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the database up to [`SCHEMA_VERSION`]. Returns the version found
/// before migrating.
pub(crate) fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let found: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(found as usize) {
        let version = idx as u32 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        tracing::info!(version, "applied schema migration");
    }

    Ok(found)
}
