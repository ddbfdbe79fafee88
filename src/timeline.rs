// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Timeline query (§4.G): turns catalog rows into the JSON-shaped segment
//! list the HTTP layer serves, with tolerant time-parameter parsing.

use base::clock::Clocks;
use base::strutil::encode_size;
use base::time::{self, Boundary};
use base::Error;
use db::{Order, RecordingCatalog, SegmentMeta};
use jiff::{SignedDuration, Timestamp};
use serde::Serialize;

const DEFAULT_LOOKBACK: SignedDuration = SignedDuration::from_secs(24 * 3600);

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Segment {
    pub id: i64,
    pub stream: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration: i64,
    /// Human-readable (`encode_size`), matching the original recorder's JSON
    /// shape (§6) rather than a raw byte count.
    pub size: String,
    pub has_detection: bool,
    pub start_timestamp: String,
    pub end_timestamp: String,
    pub local_start_timestamp: String,
    pub local_end_timestamp: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct TimelineResponse {
    pub stream: String,
    pub start_time: i64,
    pub end_time: i64,
    pub segment_count: usize,
    pub segments: Vec<Segment>,
}

fn default_bound(boundary: Boundary, now: Timestamp) -> Timestamp {
    match boundary {
        Boundary::Start => now.checked_sub(DEFAULT_LOOKBACK).unwrap_or(now),
        Boundary::End => now,
    }
}

/// Resolves an HTTP query parameter into a boundary timestamp. A missing
/// *or unparseable* parameter defaults per §4.G/§7's "bad time format" rule:
/// start defaults to now − 24h, end defaults to now. Only `/api/timeline/play`
/// hard-errors on a malformed `start`; the timeline/manifest listing
/// endpoints this feeds are best-effort.
pub fn resolve_bound(raw: Option<&str>, boundary: Boundary, now: Timestamp) -> Timestamp {
    let Some(s) = raw.filter(|s| !s.is_empty()) else {
        return default_bound(boundary, now);
    };
    time::parse_boundary(s, boundary).unwrap_or_else(|e| {
        tracing::warn!(exception = %e.chain(), raw = s, "malformed time bound; using default");
        default_bound(boundary, now)
    })
}

fn from_meta(m: SegmentMeta) -> Segment {
    let start = Timestamp::from_second(m.start_time).unwrap_or(Timestamp::UNIX_EPOCH);
    let end = Timestamp::from_second(m.end_time).unwrap_or(Timestamp::UNIX_EPOCH);
    Segment {
        id: m.id,
        stream: m.stream,
        start_time: m.start_time,
        end_time: m.end_time,
        duration: m.end_time - m.start_time,
        size: encode_size(m.size_bytes),
        has_detection: m.has_detection,
        start_timestamp: start.to_string(),
        end_timestamp: end.to_string(),
        local_start_timestamp: time::format_local(start),
        local_end_timestamp: time::format_local(end),
    }
}

/// Runs the timeline query for `stream` over `[t0, t1]`, capped to `cap`
/// rows and ordered oldest-first.
pub fn timeline(
    catalog: &RecordingCatalog,
    stream: &str,
    t0: Timestamp,
    t1: Timestamp,
    cap: i64,
) -> Result<TimelineResponse, Error> {
    let rows = catalog.query(
        t0.as_second(),
        t1.as_second(),
        Some(stream),
        Order::StartTimeAsc,
        0,
        cap,
    )?;
    let segments: Vec<Segment> = rows.into_iter().map(from_meta).collect();
    Ok(TimelineResponse {
        stream: stream.to_string(),
        start_time: t0.as_second(),
        end_time: t1.as_second(),
        segment_count: segments.len(),
        segments,
    })
}

/// Convenience wrapper used by the HTTP handler: resolves `start`/`end`
/// query parameters (with defaults) against `clocks`, then runs the query.
pub fn timeline_from_query(
    catalog: &RecordingCatalog,
    clocks: &dyn Clocks,
    stream: &str,
    start: Option<&str>,
    end: Option<&str>,
    cap: i64,
) -> Result<TimelineResponse, Error> {
    let now = clocks.realtime();
    let t0 = resolve_bound(start, Boundary::Start, now);
    let t1 = resolve_bound(end, Boundary::End, now);
    timeline(catalog, stream, t0, t1, cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::clock::SimulatedClocks;
    use base::time::testutil;
    use db::testutil as dbtestutil;

    fn seg(stream: &str, start: i64, end: i64) -> SegmentMeta {
        SegmentMeta {
            id: 0,
            stream: stream.to_string(),
            file_path: format!("/var/lib/sentry-nvr/{stream}/{start}.mp4"),
            start_time: start,
            end_time: end,
            size_bytes: 4096,
            has_detection: false,
        }
    }

    #[test]
    fn overlapping_segments_all_returned_in_order() {
        testutil::init_zone();
        let catalog = RecordingCatalog::new(dbtestutil::open_in_memory());
        catalog.insert(&seg("cam1", 1000, 1060)).unwrap();
        catalog.insert(&seg("cam1", 1060, 1120)).unwrap();
        catalog.insert(&seg("cam1", 1120, 1180)).unwrap();

        let resp = timeline(
            &catalog,
            "cam1",
            Timestamp::from_second(1050).unwrap(),
            Timestamp::from_second(1130).unwrap(),
            100,
        )
        .unwrap();
        assert_eq!(resp.segment_count, 3);
        assert_eq!(resp.segments[0].start_time, 1000);
        assert_eq!(resp.segments[2].start_time, 1120);
    }

    #[test]
    fn missing_bounds_default_to_last_24h_and_now() {
        testutil::init_zone();
        let clocks = SimulatedClocks::new(Timestamp::from_second(100_000).unwrap());
        let now = clocks.realtime();
        let t0 = resolve_bound(None, Boundary::Start, now);
        let t1 = resolve_bound(None, Boundary::End, now);
        assert_eq!(t1, now);
        assert_eq!(now.duration_since(t0), DEFAULT_LOOKBACK);
    }

    #[test]
    fn explicit_bound_overrides_default() {
        testutil::init_zone();
        let now = Timestamp::from_second(100_000).unwrap();
        let t0 = resolve_bound(Some("2000-01-01"), Boundary::Start, now);
        assert_ne!(t0, now);
    }

    #[test]
    fn malformed_bound_falls_back_to_default_instead_of_erroring() {
        testutil::init_zone();
        let now = Timestamp::from_second(100_000).unwrap();
        let t0 = resolve_bound(Some("not-a-time"), Boundary::Start, now);
        assert_eq!(now.duration_since(t0), DEFAULT_LOOKBACK);
    }
}
