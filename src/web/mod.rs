// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! HTTP surface (§6): `GET /api/timeline/segments`, `GET
//! /api/timeline/manifest`, `GET /api/timeline/play`, and `GET
//! /api/recordings/play/<id>`, plus the one place an [`base::ErrorKind`]
//! becomes an HTTP status code.
//!
//! Built on raw `hyper` + `hyper-util`, matching the teacher's own choice of
//! a hand-rolled service over a framework. Recording playback does its own
//! `Range:` handling rather than going through `http-serve`'s `Entity`
//! trait, since this is a single, already-bounded file per request rather
//! than the teacher's arbitrary directory tree.

use crate::dedup::Rejection;
use crate::manifest::{self, ManifestBuilder};
use crate::timeline;
use base::clock::Clocks;
use base::time::Boundary;
use base::{err, Error, ErrorKind};
use bytes::Bytes;
use db::{RecordingCatalog, SegmentMeta};
use http::{Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::collections::HashMap;
use std::convert::Infallible;
use std::io::{Read, Seek, SeekFrom};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub type Body = BoxBody<Bytes, std::io::Error>;

/// Everything a request handler needs; cheap to clone (all `Arc` inside).
#[derive(Clone)]
pub struct State {
    pub catalog: Arc<RecordingCatalog>,
    pub clocks: Arc<dyn Clocks>,
    pub manifest_builder: Arc<ManifestBuilder>,
    pub dedup: Arc<crate::dedup::Dedup>,
}

fn full_body(data: impl Into<Bytes>) -> Body {
    Full::new(data.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

fn parse_query(query: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// Binds `addr` and serves requests until `shutdown` fires, then finishes
/// in-flight connections before returning.
pub async fn serve(
    addr: SocketAddr,
    state: State,
    shutdown: base::shutdown::Receiver,
) -> Result<(), Error> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| err!(Internal; source: e))?;
    info!(%addr, "http surface listening");

    let mut shutdown_fut = Box::pin(shutdown.future());
    let mut conns = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(exception = %e, "accept failed");
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let state = state.clone();
                let conn_shutdown = shutdown.future();
                conns.spawn(async move {
                    let builder = auto::Builder::new(TokioExecutor::new());
                    let conn = builder.serve_connection(
                        io,
                        service_fn(move |req| {
                            let state = state.clone();
                            async move { Ok::<_, Infallible>(handle(state, req).await) }
                        }),
                    );
                    tokio::pin!(conn);
                    tokio::select! {
                        res = conn.as_mut() => {
                            if let Err(e) = res {
                                warn!(%peer, exception = %e, "connection error");
                            }
                        }
                        _ = conn_shutdown => {
                            conn.as_mut().graceful_shutdown();
                            if let Err(e) = conn.await {
                                warn!(%peer, exception = %e, "connection error during shutdown");
                            }
                        }
                    }
                });
            }
            _ = &mut shutdown_fut => {
                info!("http surface shutting down");
                break;
            }
        }
    }

    drop(listener);
    while conns.join_next().await.is_some() {}
    Ok(())
}

async fn handle(state: State, req: Request<Incoming>) -> Response<Body> {
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let range = req
        .headers()
        .get(http::header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let result = if req.method() != http::Method::GET {
        Err(err!(InvalidArgument, "unsupported method {}", req.method()))
    } else if path == "/api/timeline/segments" {
        segments(&state, &query)
    } else if path == "/api/timeline/manifest" {
        manifest_response(&state, &query)
    } else if path == "/api/timeline/play" {
        play_by_timestamp(&state, &query)
    } else if let Some(id) = path.strip_prefix("/api/recordings/play/") {
        play_recording(&state, id, range.as_deref()).await
    } else {
        Err(err!(NotFound, "no such route {path:?}"))
    };

    result.unwrap_or_else(error_response)
}

fn segments(state: &State, query: &str) -> Result<Response<Body>, Error> {
    let params = parse_query(query);
    let stream = params
        .get("stream")
        .ok_or_else(|| err!(InvalidArgument, "missing stream parameter"))?;
    let cap = params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);
    let resp = timeline::timeline_from_query(
        &state.catalog,
        state.clocks.as_ref(),
        stream,
        params.get("start").map(String::as_str),
        params.get("end").map(String::as_str),
        cap,
    )?;
    let body = serde_json::to_vec(&resp).map_err(|e| err!(Internal; source: e))?;
    json_response(StatusCode::OK, body)
}

fn manifest_response(state: &State, query: &str) -> Result<Response<Body>, Error> {
    let params = parse_query(query);
    let stream = params
        .get("stream")
        .ok_or_else(|| err!(InvalidArgument, "missing stream parameter"))?;
    let now = state.clocks.realtime();
    let start_ts = timeline::resolve_bound(params.get("start").map(String::as_str), Boundary::Start, now);
    let end_ts = timeline::resolve_bound(params.get("end").map(String::as_str), Boundary::End, now);

    let resp = timeline::timeline(&state.catalog, stream, start_ts, end_ts, 10_000)?;
    if resp.segments.is_empty() {
        return Err(err!(NotFound, "no segments available to build a manifest"));
    }
    let path = state.manifest_builder.build_manifest(
        stream,
        &resp.segments,
        start_ts.as_second(),
        now.as_second(),
    )?;
    let body = std::fs::read(&path).map_err(|e| err!(Internal; source: e))?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/vnd.apple.mpegurl")
        .header("cache-control", "no-cache")
        .header("connection", "close")
        .body(full_body(body))
        .expect("static response builds"))
}

/// Resolves `stream`+`start` to a segment id and redirects to its
/// `/api/recordings/play/<id>` URL (§6), rather than serving bytes itself —
/// that keeps dedup and Range handling in one place.
fn play_by_timestamp(state: &State, query: &str) -> Result<Response<Body>, Error> {
    let params = parse_query(query);
    let stream = params
        .get("stream")
        .ok_or_else(|| err!(InvalidArgument, "missing stream parameter"))?;
    let start: i64 = params
        .get("start")
        .ok_or_else(|| err!(InvalidArgument, "missing start parameter"))?
        .parse()
        .map_err(|_| err!(InvalidArgument, "invalid start parameter"))?;
    let ts = jiff::Timestamp::from_second(start).map_err(|e| err!(InvalidArgument; source: e))?;

    let window = timeline::timeline(&state.catalog, stream, ts, ts, 1)?;
    let seg = window
        .segments
        .into_iter()
        .next()
        .ok_or_else(|| err!(NotFound, "no segment covering {start}"))?;
    Ok(Response::builder()
        .status(StatusCode::FOUND)
        .header("location", format!("/api/recordings/play/{}", seg.id))
        .body(full_body(Vec::new()))
        .expect("static response builds"))
}

async fn play_recording(
    state: &State,
    id_str: &str,
    range: Option<&str>,
) -> Result<Response<Body>, Error> {
    let id: i64 = id_str
        .parse()
        .map_err(|_| err!(InvalidArgument, "invalid recording id {id_str:?}"))?;
    let activation = state.dedup.try_activate(id).map_err(|r| match r {
        Rejection::Duplicate => {
            err!(Aborted, "recording {id} already has a playback request in flight")
        }
        Rejection::Overflow => err!(ResourceExhausted, "too many concurrent playback requests"),
    })?;
    let meta = state
        .catalog
        .by_id(id)?
        .ok_or_else(|| err!(NotFound, "no such recording {id}"))?;
    let result = serve_segment(&meta, range);
    drop(activation);
    result
}

fn serve_segment(meta: &SegmentMeta, range: Option<&str>) -> Result<Response<Body>, Error> {
    let path = Path::new(&meta.file_path);
    serve_file(path, manifest::content_type_for(path), range)
}

/// Adds the playback response headers §4.H requires on every response this
/// handler returns, satisfiable or not: permissive CORS (playback clients
/// commonly run from a different origin than the recorder) and a one-hour
/// cache lifetime (recordings are immutable once written).
fn with_playback_headers(builder: http::response::Builder) -> http::response::Builder {
    builder
        .header("access-control-allow-origin", "*")
        .header("access-control-allow-methods", "GET")
        .header("access-control-allow-headers", "Range")
        .header("cache-control", "max-age=3600")
}

fn serve_file(path: &Path, content_type: &str, range: Option<&str>) -> Result<Response<Body>, Error> {
    let mut file = std::fs::File::open(path).map_err(|e| err!(NotFound; source: e))?;
    let len = file
        .metadata()
        .map_err(|e| err!(Internal; source: e))?
        .len();

    let (start, end, status) = match range.and_then(parse_range) {
        Some(spec) => {
            let (s, e) = match spec {
                RangeSpec::Range(s, e) => (s, e.unwrap_or(len.saturating_sub(1))),
                RangeSpec::Suffix(n) => (len.saturating_sub(n), len.saturating_sub(1)),
            };
            if len == 0 || s > e || e >= len {
                return Ok(with_playback_headers(
                    Response::builder()
                        .status(StatusCode::RANGE_NOT_SATISFIABLE)
                        .header("content-range", format!("bytes */{len}")),
                )
                .body(full_body(Vec::new()))
                .expect("static response builds"));
            }
            (s, e, StatusCode::PARTIAL_CONTENT)
        }
        None => (0, len.saturating_sub(1), StatusCode::OK),
    };

    let count = (end + 1 - start) as usize;
    file.seek(SeekFrom::Start(start))
        .map_err(|e| err!(Internal; source: e))?;
    let mut buf = vec![0u8; count];
    file.read_exact(&mut buf)
        .map_err(|e| err!(Internal; source: e))?;

    let mut builder = with_playback_headers(
        Response::builder()
            .status(status)
            .header("content-type", content_type)
            .header("accept-ranges", "bytes")
            .header("content-length", count.to_string()),
    );
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header("content-range", format!("bytes {start}-{end}/{len}"));
    }
    Ok(builder.body(full_body(buf)).expect("static response builds"))
}

/// A parsed `Range: bytes=...` header (single range only; multi-range
/// requests aren't supported and fall back to serving the whole file).
#[derive(Debug, PartialEq)]
enum RangeSpec {
    /// `bytes=start-` or `bytes=start-end`.
    Range(u64, Option<u64>),
    /// `bytes=-suffix_len`: the last `suffix_len` bytes of the file.
    Suffix(u64),
}

fn parse_range(header: &str) -> Option<RangeSpec> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    if start.is_empty() {
        return Some(RangeSpec::Suffix(end.parse().ok()?));
    }
    let start: u64 = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some(RangeSpec::Range(start, end))
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full_body(body))
        .expect("static response builds"))
}

/// Maps an [`ErrorKind`] to an HTTP status code exactly once (§7), here
/// rather than at each call site.
fn error_response(e: Error) -> Response<Body> {
    let status = match e.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidArgument | ErrorKind::FailedPrecondition | ErrorKind::OutOfRange => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Aborted | ErrorKind::AlreadyExists => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(exception = %e.chain(), %status, "request failed");
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(full_body(e.to_string()))
        .expect("static response builds")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_and_open_ended_ranges() {
        assert_eq!(parse_range("bytes=0-499"), Some(RangeSpec::Range(0, Some(499))));
        assert_eq!(parse_range("bytes=500-"), Some(RangeSpec::Range(500, None)));
        assert_eq!(parse_range("bytes=-500"), Some(RangeSpec::Suffix(500)));
        assert_eq!(parse_range("garbage"), None);
    }

    #[test]
    fn serves_whole_file_without_a_range_header() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("seg.mp4");
        std::fs::write(&path, b"0123456789").unwrap();
        let resp = serve_file(&path, "video/mp4", None).unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("content-length").unwrap(), "10");
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        assert_eq!(
            resp.headers().get("cache-control").unwrap(),
            "max-age=3600"
        );
    }

    #[test]
    fn serves_the_last_n_bytes_for_a_suffix_range() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("seg.mp4");
        std::fs::write(&path, b"0123456789").unwrap();
        let resp = serve_file(&path, "video/mp4", Some("bytes=-3")).unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            resp.headers().get("content-range").unwrap(),
            "bytes 7-9/10"
        );
    }

    #[test]
    fn serves_a_partial_range() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("seg.mp4");
        std::fs::write(&path, b"0123456789").unwrap();
        let resp = serve_file(&path, "video/mp4", Some("bytes=2-4")).unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            resp.headers().get("content-range").unwrap(),
            "bytes 2-4/10"
        );
    }

    #[test]
    fn rejects_a_range_past_the_end_of_the_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("seg.mp4");
        std::fs::write(&path, b"01234").unwrap();
        let resp = serve_file(&path, "video/mp4", Some("bytes=10-20")).unwrap();
        assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[test]
    fn error_kinds_map_to_the_documented_status_codes() {
        assert_eq!(
            error_response(err!(NotFound, "x")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_response(err!(InvalidArgument, "x")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(err!(ResourceExhausted, "x")).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            error_response(err!(Aborted, "x")).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            error_response(err!(Internal, "x")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn parses_query_strings_with_multiple_parameters() {
        let params = parse_query("stream=cam1&start=1000&end=2000");
        assert_eq!(params.get("stream").map(String::as_str), Some("cam1"));
        assert_eq!(params.get("start").map(String::as_str), Some("1000"));
    }

    #[test]
    fn play_by_timestamp_redirects_to_the_matching_recording_id() {
        let catalog = RecordingCatalog::new(db::testutil::open_in_memory());
        let id = catalog
            .insert(&SegmentMeta {
                id: 0,
                stream: "cam1".to_string(),
                file_path: "/tmp/cam1/1000.mp4".to_string(),
                start_time: 1000,
                end_time: 1060,
                size_bytes: 4096,
                has_detection: false,
            })
            .unwrap();
        let state = State {
            catalog: Arc::new(catalog),
            clocks: Arc::new(base::clock::RealClocks {}),
            manifest_builder: Arc::new(ManifestBuilder::new(std::env::temp_dir())),
            dedup: Arc::new(crate::dedup::Dedup::new()),
        };
        let resp = play_by_timestamp(&state, "stream=cam1&start=1030").unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers().get("location").unwrap(),
            &format!("/api/recordings/play/{id}")
        );
    }

    #[test]
    fn play_by_timestamp_missing_segment_is_not_found() {
        let state = State {
            catalog: Arc::new(RecordingCatalog::new(db::testutil::open_in_memory())),
            clocks: Arc::new(base::clock::RealClocks {}),
            manifest_builder: Arc::new(ManifestBuilder::new(std::env::temp_dir())),
            dedup: Arc::new(crate::dedup::Dedup::new()),
        };
        let err = play_by_timestamp(&state, "stream=cam1&start=1030").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn play_by_timestamp_rejects_an_unparseable_start() {
        let state = State {
            catalog: Arc::new(RecordingCatalog::new(db::testutil::open_in_memory())),
            clocks: Arc::new(base::clock::RealClocks {}),
            manifest_builder: Arc::new(ManifestBuilder::new(std::env::temp_dir())),
            dedup: Arc::new(crate::dedup::Dedup::new()),
        };
        let err = play_by_timestamp(&state, "stream=cam1&start=not-a-number").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn segments_with_a_malformed_bound_falls_back_instead_of_400() {
        let catalog = RecordingCatalog::new(db::testutil::open_in_memory());
        catalog
            .insert(&SegmentMeta {
                id: 0,
                stream: "cam1".to_string(),
                file_path: "/tmp/cam1/1000.mp4".to_string(),
                start_time: 1000,
                end_time: 1060,
                size_bytes: 4096,
                has_detection: false,
            })
            .unwrap();
        let state = State {
            catalog: Arc::new(catalog),
            clocks: Arc::new(base::clock::RealClocks {}),
            manifest_builder: Arc::new(ManifestBuilder::new(std::env::temp_dir())),
            dedup: Arc::new(crate::dedup::Dedup::new()),
        };
        let resp = segments(&state, "stream=cam1&start=garbage&end=also-garbage").unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn manifest_with_a_malformed_start_falls_back_instead_of_400() {
        let catalog = RecordingCatalog::new(db::testutil::open_in_memory());
        let dir = tempfile::TempDir::new().unwrap();
        let seg_path = dir.path().join("1000.mp4");
        std::fs::write(&seg_path, b"not really mp4").unwrap();
        catalog
            .insert(&SegmentMeta {
                id: 0,
                stream: "cam1".to_string(),
                file_path: seg_path.to_string_lossy().into_owned(),
                start_time: 1000,
                end_time: 1060,
                size_bytes: 4096,
                has_detection: false,
            })
            .unwrap();
        let state = State {
            catalog: Arc::new(catalog),
            clocks: Arc::new(base::clock::SimulatedClocks::new(
                jiff::Timestamp::from_second(2000).unwrap(),
            )),
            manifest_builder: Arc::new(ManifestBuilder::new(dir.path().to_path_buf())),
            dedup: Arc::new(crate::dedup::Dedup::new()),
        };
        let resp = manifest_response(&state, "stream=cam1&start=garbage").unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
