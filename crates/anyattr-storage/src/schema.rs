//! SQLite schema and migrations for the relational backend.
//!
//! Migrations are embedded with `include_str!` and tracked through
//! SQLite's `user_version` pragma by `rusqlite_migration`.

use std::path::Path;

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::error::StorageError;

/// Ordered migrations; `user_version` records how many have run.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(include_str!("migrations/001_initial_schema.sql"))])
}

/// Opens (or creates) the database at `path` and applies pending migrations.
pub fn open_database(path: &Path) -> Result<Connection, StorageError> {
    let mut conn = Connection::open(path)?;
    configure_and_migrate(&mut conn)?;
    Ok(conn)
}

/// Private in-memory database, migrated like a file. Used by tests and by
/// the in-memory [`StorageConfig`](crate::StorageConfig).
pub fn open_in_memory() -> Result<Connection, StorageError> {
    let mut conn = Connection::open_in_memory()?;
    configure_and_migrate(&mut conn)?;
    Ok(conn)
}

fn configure_and_migrate(conn: &mut Connection) -> Result<(), StorageError> {
    // WAL lets the CLI read while another process writes.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    // Owner deletes cascade to attributes, memberships and unique values
    // only with enforcement on; SQLite defaults it off.
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations()
        .to_latest(conn)
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_valid() {
        assert!(migrations().validate().is_ok());
    }

    #[test]
    fn reserved_any_types_are_seeded() {
        let conn = open_in_memory().unwrap();
        let kinds: Vec<(String, String)> = {
            let mut stmt = conn.prepare("SELECT key, kind FROM any_types ORDER BY key").unwrap();
            stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap()
        };
        assert_eq!(
            kinds,
            vec![("GROUP".to_string(), "GROUP".to_string()), ("USER".to_string(), "USER".to_string())]
        );
    }

    #[test]
    fn foreign_keys_enabled() {
        let conn = open_in_memory().unwrap();
        let on: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
        assert_eq!(on, 1);
    }

    #[test]
    fn unique_values_are_constrained() {
        let conn = open_in_memory().unwrap();
        // USER comes from the migration itself
        conn.execute_batch(
            "INSERT INTO anys (key, kind, any_type, realm, name, details_json)
                 VALUES ('a', 'USER', 'USER', '/', 'a', '{}'), ('b', 'USER', 'USER', '/', 'b', '{}');
             INSERT INTO plain_attr_unique_values (schema_key, formatted, any_key) VALUES ('email', 'x@y', 'a');",
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO plain_attr_unique_values (schema_key, formatted, any_key) VALUES ('email', 'x@y', 'b')",
            [],
        );
        assert!(dup.is_err());
    }
}
