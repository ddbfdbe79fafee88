// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! DDL and the per-connection "does this column exist" cache that lets the
//! stream config store tolerate schemas from before a column was added.

use rusqlite::Connection;
use std::collections::{HashMap, HashSet};

/// Full, current schema. `init` is idempotent and safe to call against an
/// already-up-to-date database (`CREATE TABLE IF NOT EXISTS`); it is not a
/// migration runner — tests that want to exercise the schema-tolerance
/// contract build a deliberately older `streams` table by hand instead.
const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS streams (
    id                        INTEGER PRIMARY KEY,
    name                      TEXT UNIQUE NOT NULL,
    url                       TEXT NOT NULL,
    enabled                   INTEGER NOT NULL DEFAULT 1,
    streaming_enabled         INTEGER NOT NULL DEFAULT 1,
    width                     INTEGER NOT NULL DEFAULT 0,
    height                    INTEGER NOT NULL DEFAULT 0,
    fps                       INTEGER NOT NULL DEFAULT 0,
    codec                     TEXT NOT NULL DEFAULT '',
    priority                  INTEGER NOT NULL DEFAULT 0,
    record                    INTEGER NOT NULL DEFAULT 1,
    segment_duration          INTEGER NOT NULL DEFAULT 60,
    detection_based_recording INTEGER NOT NULL DEFAULT 0,
    detection_model           TEXT NOT NULL DEFAULT '',
    detection_threshold       REAL NOT NULL DEFAULT 0.5,
    detection_interval        INTEGER NOT NULL DEFAULT 10,
    pre_detection_buffer      INTEGER NOT NULL DEFAULT 0,
    post_detection_buffer     INTEGER NOT NULL DEFAULT 3,
    protocol                  TEXT NOT NULL DEFAULT 'tcp',
    is_onvif                  INTEGER NOT NULL DEFAULT 0,
    record_audio              INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS recordings (
    id          INTEGER PRIMARY KEY,
    stream_name TEXT NOT NULL,
    file_path   TEXT NOT NULL,
    start_time  INTEGER NOT NULL,
    end_time    INTEGER NOT NULL,
    size_bytes  INTEGER NOT NULL,
    has_detection INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS recordings_stream_start ON recordings (stream_name, start_time);

CREATE TABLE IF NOT EXISTS events (
    id          INTEGER PRIMARY KEY,
    kind        TEXT NOT NULL,
    stream_name TEXT NOT NULL,
    message     TEXT NOT NULL,
    file_path   TEXT NOT NULL,
    ts          INTEGER NOT NULL
);
"#;

pub fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(DDL)
}

/// Caches `PRAGMA table_info` results so every insert/select on a
/// schema-tolerant table doesn't re-query sqlite's catalog for column
/// existence. Invalidated on any DDL this process performs (there is none
/// past startup today, but the hook is here for future migrations).
#[derive(Default)]
pub struct ColumnCache {
    tables: HashMap<String, HashSet<String>>,
}

impl ColumnCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_column(
        &mut self,
        conn: &Connection,
        table: &str,
        column: &str,
    ) -> rusqlite::Result<bool> {
        if !self.tables.contains_key(table) {
            self.tables.insert(table.to_string(), Self::load(conn, table)?);
        }
        Ok(self.tables[table].contains(column))
    }

    pub fn invalidate(&mut self, table: &str) {
        self.tables.remove(table);
    }

    fn load(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_column_reflects_actual_table_shape() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE streams (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();
        let mut cache = ColumnCache::new();
        assert!(cache.has_column(&conn, "streams", "name").unwrap());
        assert!(!cache.has_column(&conn, "streams", "record_audio").unwrap());
    }

    #[test]
    fn cache_is_populated_once_per_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE streams (id INTEGER PRIMARY KEY);")
            .unwrap();
        let mut cache = ColumnCache::new();
        cache.has_column(&conn, "streams", "id").unwrap();
        assert_eq!(cache.tables.len(), 1);
        cache.has_column(&conn, "streams", "id").unwrap();
        assert_eq!(cache.tables.len(), 1);
    }
}
