use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS codebook (
            code      INTEGER PRIMARY KEY,
            prototype BLOB NOT NULL,
            ema_mass  REAL NOT NULL,
            ema_sum   BLOB NOT NULL,
            usage     INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS records (
            id               TEXT PRIMARY KEY,
            code             INTEGER NOT NULL,
            importance       REAL NOT NULL DEFAULT 0,
            activation_count INTEGER NOT NULL DEFAULT 0,
            cluster_id       INTEGER,
            concept_tag      TEXT
        );

        CREATE TABLE IF NOT EXISTS record_weights (
            record_id TEXT NOT NULL REFERENCES records(id) ON DELETE CASCADE,
            target_id TEXT NOT NULL,
            weight    REAL NOT NULL,
            PRIMARY KEY (record_id, target_id)
        );

        CREATE TABLE IF NOT EXISTS synapses (
            source_id          TEXT NOT NULL,
            target_id          TEXT NOT NULL,
            weight             REAL NOT NULL,
            strength           REAL NOT NULL DEFAULT 0,
            synapse_type       TEXT NOT NULL DEFAULT 'excitatory',
            last_active        INTEGER NOT NULL DEFAULT 0,
            transmission_count INTEGER NOT NULL DEFAULT 0,
            plasticity_rate    REAL NOT NULL DEFAULT 1,
            is_plastic         INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (source_id, target_id)
        );

        CREATE INDEX IF NOT EXISTS idx_records_code ON records(code);
        CREATE INDEX IF NOT EXISTS idx_synapses_target ON synapses(target_id);
        ",
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    tracing::debug!(version = SCHEMA_VERSION, "schema initialized");

    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<Option<i64>> {
    let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = 'schema_version'")?;
    let version = stmt
        .query_row([], |row| {
            let v: String = row.get(0)?;
            Ok(v.parse::<i64>().unwrap_or(0))
        })
        .ok();
    Ok(version)
}
