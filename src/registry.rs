// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Recorder registry (§4.E): maps a stream name to its active writer and
//! optional pre-detection ring buffer.
//!
//! The registry hands out `Arc<Mutex<Option<Box<dyn Mp4Writer>>>>` handles
//! rather than raw pointers (see SPEC_FULL §9's resolution of the
//! `get_mp4_writer_for_stream` lifetime question). At-most-once close falls
//! out of that: whichever side — the owning recorder thread finishing its
//! segment, or `close_all` racing it during shutdown — calls
//! `Option::take()` first gets the writer; the other gets `None` and has
//! nothing to close.

use crate::ring_buffer::RingBuffer;
use crate::writer::Mp4Writer;
use base::clock::Clocks;
use db::{EventKind, RecordingCatalog};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

pub type WriterHandle = Arc<Mutex<Option<Box<dyn Mp4Writer>>>>;

struct Slot {
    writer: WriterHandle,
    ring: Option<Arc<RingBuffer>>,
    output_path: PathBuf,
}

#[derive(Default)]
pub struct Registry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers a new writer for `name`. If a writer was already
    /// registered there, it is closed here, after the registry lock is
    /// released (the "snapshot under lock, finalize outside" pattern used
    /// throughout this module).
    pub fn register(
        &self,
        name: &str,
        writer: Box<dyn Mp4Writer>,
        ring: Option<Arc<RingBuffer>>,
    ) -> WriterHandle {
        let output_path = writer.output_path().to_path_buf();
        let handle: WriterHandle = Arc::new(Mutex::new(Some(writer)));
        let displaced = {
            let mut slots = self.slots.lock();
            let displaced = slots.remove(name);
            slots.insert(
                name.to_string(),
                Slot {
                    writer: handle.clone(),
                    ring,
                    output_path,
                },
            );
            displaced
        };
        if let Some(old) = displaced {
            if let Some(mut w) = old.writer.lock().take() {
                if let Err(e) = w.close() {
                    warn!(stream = name, exception = %e.chain(), "closing displaced writer");
                }
            }
        }
        handle
    }

    /// Snapshot read: a clone of the writer handle currently registered for
    /// `name`, valid to use for the lookup's one call. The caller doesn't
    /// hold the registry lock while using it.
    pub fn lookup(&self, name: &str) -> Option<WriterHandle> {
        self.slots.lock().get(name).map(|s| s.writer.clone())
    }

    pub fn lookup_ring(&self, name: &str) -> Option<Arc<RingBuffer>> {
        self.slots.lock().get(name).and_then(|s| s.ring.clone())
    }

    /// Removes `name`'s slot without closing its writer — ownership of the
    /// writer returns to the caller (normally the recorder thread, about to
    /// finalize its last segment itself).
    pub fn unregister(&self, name: &str) {
        self.slots.lock().remove(name);
    }

    /// Shutdown safety net: snapshots every slot and clears the table under
    /// one lock acquisition, then — with the lock released — closes each
    /// writer at most once, stats its file, and logs a `RECORDING_STOP`
    /// event per writer.
    pub fn close_all(&self, catalog: &RecordingCatalog, clocks: &dyn Clocks) {
        let snapshot: Vec<(String, Slot)> = {
            let mut slots = self.slots.lock();
            slots.drain().collect()
        };
        for (name, slot) in snapshot {
            let taken = slot.writer.lock().take();
            if let Some(mut w) = taken {
                if let Err(e) = w.close() {
                    warn!(stream = %name, exception = %e.chain(), "closing writer during shutdown");
                }
            }
            let size = std::fs::metadata(&slot.output_path)
                .map(|m| m.len())
                .unwrap_or(0);
            let ts = clocks.realtime().as_second();
            let path = slot.output_path.to_string_lossy().into_owned();
            if let Err(e) = catalog.insert_event(
                EventKind::RecordingStop,
                &name,
                &format!("closed during shutdown ({size} bytes)"),
                &path,
                ts,
            ) {
                warn!(stream = %name, exception = %e.chain(), "logging shutdown event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::clock::RealClocks;
    use base::Error;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingWriter {
        path: PathBuf,
        closes: Arc<AtomicUsize>,
    }

    impl Mp4Writer for CountingWriter {
        fn write_packet(&mut self, _p: &crate::writer::Packet) -> Result<(), Error> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), Error> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn output_path(&self) -> &Path {
            &self.path
        }
    }

    #[test]
    fn registering_over_an_existing_slot_closes_exactly_the_old_writer() {
        let registry = Registry::new();
        let closes1 = Arc::new(AtomicUsize::new(0));
        let closes2 = Arc::new(AtomicUsize::new(0));
        registry.register(
            "cam1",
            Box::new(CountingWriter {
                path: "/tmp/a.mp4".into(),
                closes: closes1.clone(),
            }),
            None,
        );
        registry.register(
            "cam1",
            Box::new(CountingWriter {
                path: "/tmp/b.mp4".into(),
                closes: closes2.clone(),
            }),
            None,
        );
        assert_eq!(closes1.load(Ordering::SeqCst), 1);
        assert_eq!(closes2.load(Ordering::SeqCst), 0);

        let handle = registry.lookup("cam1").unwrap();
        assert!(handle.lock().is_some());
    }

    #[test]
    fn close_all_closes_every_writer_exactly_once_and_logs_events() {
        let catalog = RecordingCatalog::new(db::testutil::open_in_memory());
        let registry = Registry::new();
        let mut counters = Vec::new();
        for i in 0..4 {
            let closes = Arc::new(AtomicUsize::new(0));
            registry.register(
                &format!("cam{i}"),
                Box::new(CountingWriter {
                    path: format!("/tmp/cam{i}.mp4").into(),
                    closes: closes.clone(),
                }),
                None,
            );
            counters.push(closes);
        }
        registry.close_all(&catalog, &RealClocks {});
        for c in &counters {
            assert_eq!(c.load(Ordering::SeqCst), 1);
        }
        assert!(registry.lookup("cam0").is_none());
    }

    #[test]
    fn unregister_does_not_close_the_writer() {
        let registry = Registry::new();
        let closes = Arc::new(AtomicUsize::new(0));
        registry.register(
            "cam1",
            Box::new(CountingWriter {
                path: "/tmp/a.mp4".into(),
                closes: closes.clone(),
            }),
            None,
        );
        registry.unregister("cam1");
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert!(registry.lookup("cam1").is_none());
    }
}
