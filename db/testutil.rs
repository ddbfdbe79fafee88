// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Test fixtures shared by this crate's own tests and by the dependent
//! binary crate. Not `#[cfg(test)]`-gated: that attribute isn't propagated
//! to dependent crates, so this module is plain `pub` instead.

use rusqlite::Connection;

/// An in-memory database with the current schema already applied.
pub fn open_in_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory sqlite connection");
    crate::schema::init(&conn).expect("schema init");
    conn
}

/// An in-memory database whose `streams` table predates the detection,
/// protocol, onvif, and audio columns — for exercising the schema-tolerance
/// contract (§4.A, §8 scenario E5).
pub fn open_in_memory_legacy_streams() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory sqlite connection");
    conn.execute_batch(
        "CREATE TABLE streams (
            id                INTEGER PRIMARY KEY,
            name              TEXT UNIQUE NOT NULL,
            url               TEXT NOT NULL,
            enabled           INTEGER NOT NULL DEFAULT 1,
            streaming_enabled INTEGER NOT NULL DEFAULT 1,
            width             INTEGER NOT NULL DEFAULT 0,
            height            INTEGER NOT NULL DEFAULT 0,
            fps               INTEGER NOT NULL DEFAULT 0,
            codec             TEXT NOT NULL DEFAULT '',
            priority          INTEGER NOT NULL DEFAULT 0,
            record            INTEGER NOT NULL DEFAULT 1,
            segment_duration  INTEGER NOT NULL DEFAULT 60
        );",
    )
    .expect("legacy streams table");
    conn
}
