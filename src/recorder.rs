// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Recorder thread (§4.F): one OS thread per actively-recording stream,
//! cycling through `idle → opening → running → rotating/stopping →
//! terminated`.

use crate::registry::Registry;
use crate::ring_buffer::{self, RingBuffer};
use crate::stream_source::{Opener, Source};
use crate::writer::{CodecParams, FileMp4Writer, Mp4Writer, Packet};
use base::clock::{self, Clocks};
use base::{err, shutdown, Error, ErrorKind};
use db::{EventKind, RecordingCatalog, SegmentMeta, StreamStore};
use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// How many consecutive transient errors `next_packet_with_retry` tolerates
/// (with a 1s backoff sleep between each, per `clock::retry`) before giving
/// up and letting the recorder thread transition to `stopping`.
const MAX_TRANSIENT_RETRIES: u32 = 5;

/// `Unavailable` is the one `ErrorKind` `Source::next_packet` documents as
/// retryable; anything else (codec errors, permission errors, ...) is
/// treated as fatal and not retried at all.
fn is_transient(e: &Error) -> bool {
    e.kind() == ErrorKind::Unavailable
}

/// Fetches the next packet, retrying transient errors with backoff via
/// `clock::retry` up to `MAX_TRANSIENT_RETRIES` times. A fatal error, or a
/// transient one that exhausts the budget, is reported as `Err`.
fn next_packet_with_retry(
    source: &mut dyn Source,
    clocks: &dyn Clocks,
    name: &str,
) -> Result<Option<Packet>, Error> {
    let (bound_tx, bound_rx) = shutdown::channel();
    let bound_tx = Cell::new(Some(bound_tx));
    let mut attempts = 0u32;
    clock::retry(clocks, &bound_rx, &mut || {
        source.next_packet().inspect_err(|e| {
            if !is_transient(e) {
                error!(stream = name, exception = %e.chain(), "fatal source error; stopping");
                bound_tx.take();
            } else if attempts >= MAX_TRANSIENT_RETRIES {
                error!(stream = name, exception = %e.chain(), attempts, "source did not recover; stopping");
                bound_tx.take();
            } else {
                attempts += 1;
            }
        })
    })
    .map_err(|_| {
        err!(
            Unavailable,
            "source for {name} did not recover after {attempts} retries"
        )
    })
}

/// Shared, read-only context every recorder thread needs. Cheap to clone
/// (everything inside is already an `Arc`).
#[derive(Clone)]
pub struct RecorderCtx {
    pub storage_root: PathBuf,
    pub streams: Arc<StreamStore>,
    pub catalog: Arc<RecordingCatalog>,
    pub registry: Arc<Registry>,
    pub opener: Arc<dyn Opener>,
    pub clocks: Arc<dyn Clocks>,
}

struct ThreadContext {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns the table of currently-spawned recorder threads (the "parallel
/// fixed-size `recording_contexts` table" of §4.F, sized dynamically here).
pub struct Recorder {
    ctx: RecorderCtx,
    contexts: parking_lot::Mutex<HashMap<String, ThreadContext>>,
    shutting_down: AtomicBool,
}

impl Recorder {
    pub fn new(ctx: RecorderCtx) -> Self {
        Recorder {
            ctx,
            contexts: parking_lot::Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Starts recording `name` using the URL from its stored stream config.
    pub fn start(&self, name: &str) -> Result<(), Error> {
        let config = self
            .ctx
            .streams
            .get(name)?
            .ok_or_else(|| err!(NotFound, "no such stream: {name}"))?;
        let url = config.url.clone();
        self.start_with_url(name, &url)
    }

    /// Starts recording `name`, overriding the URL from its stored config
    /// (e.g. to route through an upstream relay).
    pub fn start_with_url(&self, name: &str, url: &str) -> Result<(), Error> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(err!(FailedPrecondition, "recorder is shutting down"));
        }
        let config = self
            .ctx
            .streams
            .get(name)?
            .ok_or_else(|| err!(NotFound, "no such stream: {name}"))?;

        let mut contexts = self.contexts.lock();
        if contexts.contains_key(name) {
            return Err(err!(AlreadyExists, "{name} is already recording"));
        }

        let running = Arc::new(AtomicBool::new(true));
        let ctx = self.ctx.clone();
        let name_owned = name.to_string();
        let url_owned = url.to_string();
        let running_clone = running.clone();
        let handle = std::thread::Builder::new()
            .name(format!("rec-{name}"))
            .spawn(move || record_loop(&ctx, &name_owned, &url_owned, &config, &running_clone))
            .map_err(|e| err!(Internal; source: e))?;

        contexts.insert(
            name.to_string(),
            ThreadContext {
                running,
                handle,
            },
        );
        Ok(())
    }

    /// Stops `name`'s recorder thread and waits for it to finish finalizing
    /// its last segment. A no-op if `name` isn't recording.
    pub fn stop(&self, name: &str) {
        let removed = self.contexts.lock().remove(name);
        if let Some(ctx) = removed {
            ctx.running.store(false, Ordering::SeqCst);
            if ctx.handle.join().is_err() {
                error!(stream = name, "recorder thread panicked");
            }
        }
    }

    /// Stops every recorder, then runs the registry's shutdown safety net
    /// for any writer whose thread didn't reach its own exit path.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let names: Vec<String> = self.contexts.lock().keys().cloned().collect();
        for name in names {
            self.stop(&name);
        }
        self.ctx
            .registry
            .close_all(&self.ctx.catalog, self.ctx.clocks.as_ref());
    }
}

fn segment_path(storage_root: &Path, stream: &str, start_epoch: i64) -> PathBuf {
    storage_root.join(stream).join(format!("{start_epoch}.mp4"))
}

fn open_segment(
    ctx: &RecorderCtx,
    stream: &str,
    config: &db::StreamConfig,
    start_epoch: i64,
) -> Result<Box<dyn Mp4Writer>, Error> {
    let path = segment_path(&ctx.storage_root, stream, start_epoch);
    let params = CodecParams {
        width: config.width as u32,
        height: config.height as u32,
        fps: config.fps as u32,
    };
    Ok(Box::new(FileMp4Writer::open(&path, params)?))
}

fn finalize_segment(
    ctx: &RecorderCtx,
    stream: &str,
    mut writer: Box<dyn Mp4Writer>,
    start_time: i64,
    end_time: i64,
) {
    let path = writer.output_path().to_path_buf();
    if let Err(e) = writer.close() {
        warn!(stream, exception = %e.chain(), "finalizing segment writer");
        let _ = ctx.catalog.insert_event(
            EventKind::WriterFinalizeFailed,
            stream,
            &e.to_string(),
            &path.to_string_lossy(),
            end_time,
        );
    }
    let size_bytes = std::fs::metadata(&path).map(|m| m.len() as i64).unwrap_or(0);
    let meta = SegmentMeta {
        id: 0,
        stream: stream.to_string(),
        file_path: path.to_string_lossy().into_owned(),
        start_time,
        end_time,
        size_bytes,
        has_detection: false,
    };
    if let Err(e) = ctx.catalog.insert(&meta) {
        error!(stream, exception = %e.chain(), "persisting finalized segment");
    }
}

/// The recorder thread body. A free function (not a `Recorder` method) so
/// tests can drive it directly on the calling thread with a canned source,
/// no real thread spawn or sleep required.
fn record_loop(
    ctx: &RecorderCtx,
    name: &str,
    url: &str,
    config: &db::StreamConfig,
    running: &AtomicBool,
) {
    let mut source = match ctx.opener.open(url) {
        Ok(s) => s,
        Err(e) => {
            error!(stream = name, exception = %e.chain(), "opening stream source");
            return;
        }
    };

    let ring = if config.pre_detection_buffer > 0 {
        Some(Arc::new(RingBuffer::new(ring_buffer::capacity_for(
            config.pre_detection_buffer,
            config.fps,
        ))))
    } else {
        None
    };

    let mut segment_start = ctx.clocks.realtime().as_second();
    let writer = match open_segment(ctx, name, config, segment_start) {
        Ok(w) => w,
        Err(e) => {
            error!(stream = name, exception = %e.chain(), "opening segment writer");
            return;
        }
    };
    let mut handle = ctx.registry.register(name, writer, ring.clone());
    let _ = ctx.catalog.insert_event(
        EventKind::RecordingStart,
        name,
        "recording started",
        "",
        segment_start,
    );
    info!(stream = name, "recording started");

    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        match next_packet_with_retry(source.as_mut(), ctx.clocks.as_ref(), name) {
            Ok(Some(packet)) => {
                if let Some(ring) = &ring {
                    ring.push(packet.clone());
                }
                let mut guard = handle.lock();
                let Some(w) = guard.as_mut() else {
                    // Raced with registry::close_all during shutdown; our
                    // writer is already gone.
                    break;
                };
                if let Err(e) = w.write_packet(&packet) {
                    error!(stream = name, exception = %e.chain(), "writing packet; stopping");
                    break;
                }
            }
            Ok(None) => {
                info!(stream = name, "source exhausted");
                break;
            }
            Err(_) => {
                // Already logged (fatal, or the transient-retry budget was
                // exhausted) inside `next_packet_with_retry`.
                break;
            }
        }

        let now = ctx.clocks.realtime().as_second();
        if now - segment_start >= config.segment_duration {
            ctx.registry.unregister(name);
            if let Some(old) = handle.lock().take() {
                finalize_segment(ctx, name, old, segment_start, now);
            }
            segment_start = now;
            let writer = match open_segment(ctx, name, config, segment_start) {
                Ok(w) => w,
                Err(e) => {
                    error!(stream = name, exception = %e.chain(), "rotating to new segment");
                    break;
                }
            };
            handle = ctx.registry.register(name, writer, ring.clone());
        }
    }

    ctx.registry.unregister(name);
    let end_time = ctx.clocks.realtime().as_second();
    if let Some(w) = handle.lock().take() {
        finalize_segment(ctx, name, w, segment_start, end_time);
    }
    let _ = ctx.catalog.insert_event(
        EventKind::RecordingStop,
        name,
        "recording stopped",
        "",
        end_time,
    );
}
