use anyhow::{Result, bail};
use rusqlite::{Connection, OptionalExtension, params};

pub const SCHEMA_VERSION: i64 = 1;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY,
            key TEXT UNIQUE,
            label TEXT NOT NULL,
            name TEXT,
            file TEXT,
            path TEXT,
            text TEXT,
            start_line INTEGER,
            end_line INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_nodes_name ON nodes(name);
        CREATE INDEX IF NOT EXISTS idx_nodes_label_name ON nodes(label, name);
        CREATE INDEX IF NOT EXISTS idx_nodes_path ON nodes(path);

        CREATE TABLE IF NOT EXISTS edges (
            id INTEGER PRIMARY KEY,
            source_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            target_id INTEGER NOT NULL,
            FOREIGN KEY(source_id) REFERENCES nodes(id),
            FOREIGN KEY(target_id) REFERENCES nodes(id),
            UNIQUE(source_id, kind, target_id)
        );

        CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id, kind);
        CREATE INDEX IF NOT EXISTS idx_edges_kind ON edges(kind);
        COMMIT;
        ",
    )?;

    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    let stored = stored.and_then(|value| value.parse::<i64>().ok());
    match stored {
        Some(version) if version > SCHEMA_VERSION => {
            bail!("store schema version {version} is newer than supported {SCHEMA_VERSION}")
        }
        Some(version) if version == SCHEMA_VERSION => {}
        _ => {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![SCHEMA_VERSION.to_string()],
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        let version: String = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION.to_string());
    }

    #[test]
    fn migrate_rejects_newer_schema() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute(
            "UPDATE meta SET value = '99' WHERE key = 'schema_version'",
            [],
        )
        .unwrap();
        assert!(migrate(&conn).is_err());
    }
}
