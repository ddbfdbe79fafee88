// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Stream configuration store (§4.A): add/update/delete/get/list, with a
//! schema-tolerant read/write path for the optional detection/protocol/
//! onvif/audio columns added after the original `streams` table.

use base::{bail, err, Error, ErrorKind};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{defaults, StreamConfig};
use crate::schema::ColumnCache;

pub struct StreamStore {
    inner: Mutex<Inner>,
}

struct Inner {
    conn: Connection,
    columns: ColumnCache,
}

/// Which of the columns added after the original `streams` table exist on
/// this connection. Queried once per call through the shared `ColumnCache`
/// rather than scanning the catalog for every statement.
struct OptionalColumns {
    detection: bool,
    protocol: bool,
    onvif: bool,
    record_audio: bool,
}

impl OptionalColumns {
    fn probe(conn: &Connection, columns: &mut ColumnCache) -> rusqlite::Result<Self> {
        Ok(OptionalColumns {
            detection: columns.has_column(conn, "streams", "detection_based_recording")?,
            protocol: columns.has_column(conn, "streams", "protocol")?,
            onvif: columns.has_column(conn, "streams", "is_onvif")?,
            record_audio: columns.has_column(conn, "streams", "record_audio")?,
        })
    }
}

const BASE_COLUMNS: &str =
    "name, url, enabled, streaming_enabled, width, height, fps, codec, priority, record, segment_duration";
const DETECTION_COLUMNS: &str =
    "detection_based_recording, detection_model, detection_threshold, detection_interval, pre_detection_buffer, post_detection_buffer";

impl StreamStore {
    pub fn new(conn: Connection) -> Self {
        StreamStore {
            inner: Mutex::new(Inner {
                conn,
                columns: ColumnCache::new(),
            }),
        }
    }

    /// Adds a stream, or re-enables and overwrites a matching *disabled* row
    /// of the same name, returning its id either way.
    pub fn add(&self, config: &StreamConfig) -> Result<i64, Error> {
        let mut inner = self.inner.lock();
        let existing: Option<i64> = inner
            .conn
            .query_row(
                "SELECT id FROM streams WHERE name = ?1 AND enabled = 0",
                params![config.name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            Self::write_row(&mut inner, Some(id), config)?;
            return Ok(id);
        }
        Self::write_row(&mut inner, None, config)
    }

    /// Overwrites an existing row by name. Errors with `NotFound` if absent.
    pub fn update(&self, name: &str, config: &StreamConfig) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let id: Option<i64> = inner
            .conn
            .query_row(
                "SELECT id FROM streams WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = id else {
            bail!(NotFound, "no such stream {name:?}");
        };
        Self::write_row(&mut inner, Some(id), config)?;
        Ok(())
    }

    /// Inserts a new row (`id` is `None`) or overwrites an existing one by
    /// id, honoring whichever optional columns this connection actually has.
    fn write_row(inner: &mut Inner, id: Option<i64>, config: &StreamConfig) -> Result<i64, Error> {
        let opt = OptionalColumns::probe(&inner.conn, &mut inner.columns)?;

        let mut columns = vec![BASE_COLUMNS];
        if opt.detection {
            columns.push(DETECTION_COLUMNS);
        }
        if opt.protocol {
            columns.push("protocol");
        }
        if opt.onvif {
            columns.push("is_onvif");
        }
        if opt.record_audio {
            columns.push("record_audio");
        }
        let column_list = columns.join(", ");
        let placeholder_count = column_list.split(',').count();
        let placeholders: Vec<String> = (1..=placeholder_count).map(|i| format!("?{i}")).collect();

        let sql = match id {
            None => format!(
                "INSERT INTO streams ({column_list}) VALUES ({})",
                placeholders.join(", ")
            ),
            Some(_) => {
                let assignments: Vec<String> = column_list
                    .split(", ")
                    .zip(&placeholders)
                    .map(|(c, p)| format!("{c} = {p}"))
                    .collect();
                format!(
                    "UPDATE streams SET {} WHERE id = ?{}",
                    assignments.join(", "),
                    placeholder_count + 1
                )
            }
        };

        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(config.name.clone()),
            Box::new(config.url.clone()),
            Box::new(config.enabled),
            Box::new(config.streaming_enabled),
            Box::new(config.width),
            Box::new(config.height),
            Box::new(config.fps),
            Box::new(config.codec.clone()),
            Box::new(config.priority),
            Box::new(config.record),
            Box::new(config.segment_duration),
        ];
        if opt.detection {
            values.push(Box::new(config.detection_based_recording));
            values.push(Box::new(config.detection_model.clone()));
            values.push(Box::new(config.detection_threshold));
            values.push(Box::new(config.detection_interval));
            values.push(Box::new(config.pre_detection_buffer));
            values.push(Box::new(config.post_detection_buffer));
        }
        if opt.protocol {
            values.push(Box::new(config.protocol.clone()));
        }
        if opt.onvif {
            values.push(Box::new(config.is_onvif));
        }
        if opt.record_audio {
            values.push(Box::new(config.record_audio));
        }
        if let Some(id) = id {
            values.push(Box::new(id));
        }

        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        inner.conn.execute(&sql, params.as_slice())?;
        Ok(id.unwrap_or_else(|| inner.conn.last_insert_rowid()))
    }

    pub fn delete(&self, name: &str, permanent: bool) -> Result<(), Error> {
        let inner = self.inner.lock();
        let n = if permanent {
            inner
                .conn
                .execute("DELETE FROM streams WHERE name = ?1", params![name])?
        } else {
            inner.conn.execute(
                "UPDATE streams SET enabled = 0 WHERE name = ?1",
                params![name],
            )?
        };
        if n == 0 {
            bail!(NotFound, "no such stream {name:?}");
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<StreamConfig>, Error> {
        let mut inner = self.inner.lock();
        Self::select_where(&mut inner, "name = ?1", params![name])
            .map(|mut v| v.pop())
    }

    pub fn list(&self, cap: usize) -> Result<Vec<StreamConfig>, Error> {
        let mut inner = self.inner.lock();
        let mut rows = Self::select_where(&mut inner, "1 ORDER BY name LIMIT ?1", params![cap as i64])?;
        rows.truncate(cap);
        Ok(rows)
    }

    pub fn count(&self) -> Result<i64, Error> {
        let inner = self.inner.lock();
        Ok(inner
            .conn
            .query_row("SELECT COUNT(*) FROM streams", [], |row| row.get(0))?)
    }

    pub fn count_enabled(&self) -> Result<i64, Error> {
        let inner = self.inner.lock();
        Ok(inner.conn.query_row(
            "SELECT COUNT(*) FROM streams WHERE enabled = 1",
            [],
            |row| row.get(0),
        )?)
    }

    /// `None` if the stream doesn't exist; otherwise whether it's eligible
    /// for live viewing (enabled and streaming_enabled both set).
    pub fn eligible_for_live(&self, name: &str) -> Result<Option<bool>, Error> {
        Ok(self.get(name)?.map(|c| c.enabled && c.streaming_enabled))
    }

    fn select_where(
        inner: &mut Inner,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<StreamConfig>, Error> {
        let opt = OptionalColumns::probe(&inner.conn, &mut inner.columns)?;
        let mut columns = vec![BASE_COLUMNS];
        if opt.detection {
            columns.push(DETECTION_COLUMNS);
        }
        if opt.protocol {
            columns.push("protocol");
        }
        if opt.onvif {
            columns.push("is_onvif");
        }
        if opt.record_audio {
            columns.push("record_audio");
        }
        let column_list = columns.join(", ");
        let sql = format!("SELECT {column_list} FROM streams WHERE {where_clause}");
        let mut stmt = inner.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params, |row| {
                let mut i = 0;
                let name: String = row.get(i)?;
                i += 1;
                let url: String = row.get(i)?;
                i += 1;
                let enabled: bool = row.get(i)?;
                i += 1;
                let streaming_enabled: bool = row.get(i)?;
                i += 1;
                let width: i64 = row.get(i)?;
                i += 1;
                let height: i64 = row.get(i)?;
                i += 1;
                let fps: i64 = row.get(i)?;
                i += 1;
                let codec: String = row.get(i)?;
                i += 1;
                let priority: i64 = row.get(i)?;
                i += 1;
                let record: bool = row.get(i)?;
                i += 1;
                let segment_duration: i64 = row.get(i)?;
                i += 1;

                let mut config = StreamConfig {
                    name,
                    url,
                    enabled,
                    streaming_enabled,
                    width,
                    height,
                    fps,
                    codec,
                    priority,
                    record,
                    segment_duration,
                    ..StreamConfig::default()
                };

                if opt.detection {
                    config.detection_based_recording = row.get(i)?;
                    i += 1;
                    config.detection_model = row.get(i)?;
                    i += 1;
                    config.detection_threshold = row.get(i)?;
                    i += 1;
                    config.detection_interval = row.get(i)?;
                    i += 1;
                    config.pre_detection_buffer = row.get(i)?;
                    i += 1;
                    config.post_detection_buffer = row.get(i)?;
                    i += 1;
                } else {
                    config.detection_threshold = defaults::DETECTION_THRESHOLD;
                    config.detection_interval = defaults::DETECTION_INTERVAL;
                    config.pre_detection_buffer = defaults::PRE_BUFFER_SECONDS;
                    config.post_detection_buffer = defaults::POST_BUFFER_SECONDS;
                }
                if opt.protocol {
                    config.protocol = row.get(i)?;
                    i += 1;
                } else {
                    config.protocol = defaults::PROTOCOL.to_string();
                }
                if opt.onvif {
                    config.is_onvif = row.get(i)?;
                    i += 1;
                }
                if opt.record_audio {
                    config.record_audio = row.get(i)?;
                    i += 1;
                }
                let _ = i;
                Ok(config)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| err!(Internal; source: e))?;
        Ok(rows)
    }
}
