// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Segment catalog and write-only event log (§4.B).

use base::{err, Error};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{EventKind, SegmentMeta};

pub struct RecordingCatalog {
    conn: Mutex<Connection>,
}

/// Ordering for `query`'s result set.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Order {
    StartTimeAsc,
}

impl RecordingCatalog {
    pub fn new(conn: Connection) -> Self {
        RecordingCatalog {
            conn: Mutex::new(conn),
        }
    }

    pub fn insert(&self, meta: &SegmentMeta) -> Result<i64, Error> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO recordings (stream_name, file_path, start_time, end_time, size_bytes, has_detection)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                meta.stream,
                meta.file_path,
                meta.start_time,
                meta.end_time,
                meta.size_bytes,
                meta.has_detection,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn by_id(&self, id: i64) -> Result<Option<SegmentMeta>, Error> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, stream_name, file_path, start_time, end_time, size_bytes, has_detection
             FROM recordings WHERE id = ?1",
            params![id],
            Self::from_row,
        )
        .optional()
        .map_err(|e| err!(Internal; source: e))
    }

    /// Returns segments overlapping `[start_t, end_t]`, optionally filtered
    /// to one stream, ordered oldest-first, bounded by `limit`.
    pub fn query(
        &self,
        start_t: i64,
        end_t: i64,
        stream: Option<&str>,
        order: Order,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<SegmentMeta>, Error> {
        let conn = self.conn.lock();
        let order_sql = match order {
            Order::StartTimeAsc => "ORDER BY start_time ASC",
        };
        let sql = format!(
            "SELECT id, stream_name, file_path, start_time, end_time, size_bytes, has_detection
             FROM recordings
             WHERE end_time >= ?1 AND start_time <= ?2 {}
             {order_sql} LIMIT ?3 OFFSET ?4",
            stream.map(|_| "AND stream_name = ?5").unwrap_or(""),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = if let Some(stream) = stream {
            stmt.query_map(
                params![start_t, end_t, limit, offset, stream],
                Self::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()
        } else {
            stmt.query_map(params![start_t, end_t, limit, offset], Self::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()
        };
        rows.map_err(|e| err!(Internal; source: e))
    }

    pub fn insert_event(
        &self,
        kind: EventKind,
        stream: &str,
        message: &str,
        file_path: &str,
        ts: i64,
    ) -> Result<(), Error> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO events (kind, stream_name, message, file_path, ts) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![kind.as_str(), stream, message, file_path, ts],
        )?;
        Ok(())
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SegmentMeta> {
        Ok(SegmentMeta {
            id: row.get(0)?,
            stream: row.get(1)?,
            file_path: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            size_bytes: row.get(5)?,
            has_detection: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn seg(stream: &str, start: i64, end: i64) -> SegmentMeta {
        SegmentMeta {
            id: 0,
            stream: stream.to_string(),
            file_path: format!("/var/lib/sentry-nvr/{stream}/{start}.mp4"),
            start_time: start,
            end_time: end,
            size_bytes: 1024,
            has_detection: false,
        }
    }

    #[test]
    fn insert_then_by_id_round_trips() {
        let catalog = RecordingCatalog::new(testutil::open_in_memory());
        let id = catalog.insert(&seg("cam1", 1000, 1060)).unwrap();
        let got = catalog.by_id(id).unwrap().unwrap();
        assert_eq!(got.stream, "cam1");
        assert_eq!(got.start_time, 1000);
        assert_eq!(got.end_time, 1060);
    }

    #[test]
    fn query_includes_overlapping_not_just_contained_segments() {
        let catalog = RecordingCatalog::new(testutil::open_in_memory());
        catalog.insert(&seg("cam1", 1000, 1060)).unwrap();
        catalog.insert(&seg("cam1", 1060, 1120)).unwrap();
        catalog.insert(&seg("cam1", 1120, 1180)).unwrap();
        let rows = catalog
            .query(1050, 1130, Some("cam1"), Order::StartTimeAsc, 0, 100)
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].start_time, 1000);
        assert_eq!(rows[2].start_time, 1120);
    }

    #[test]
    fn query_endpoint_is_inclusive() {
        let catalog = RecordingCatalog::new(testutil::open_in_memory());
        catalog.insert(&seg("cam1", 1000, 1060)).unwrap();
        let rows = catalog
            .query(1060, 2000, Some("cam1"), Order::StartTimeAsc, 0, 100)
            .unwrap();
        assert_eq!(rows.len(), 1, "t0 == segment end should still match");
    }

    #[test]
    fn query_respects_limit_and_stream_filter() {
        let catalog = RecordingCatalog::new(testutil::open_in_memory());
        catalog.insert(&seg("cam1", 1000, 1060)).unwrap();
        catalog.insert(&seg("cam2", 1000, 1060)).unwrap();
        let rows = catalog
            .query(0, 9999, Some("cam1"), Order::StartTimeAsc, 0, 100)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stream, "cam1");

        let limited = catalog
            .query(0, 9999, None, Order::StartTimeAsc, 0, 1)
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn insert_event_succeeds_for_every_kind() {
        let catalog = RecordingCatalog::new(testutil::open_in_memory());
        for kind in [
            EventKind::RecordingStart,
            EventKind::RecordingStop,
            EventKind::WriterFinalizeFailed,
        ] {
            catalog
                .insert_event(kind, "cam1", "message", "/tmp/x.mp4", 1234)
                .unwrap();
        }
    }
}
