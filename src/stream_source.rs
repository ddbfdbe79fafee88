// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Trait boundary standing in for the RTSP/demux/codec frontend (out of
//! scope per §1: "the RTSP/demux/codec frontend that produces encoded
//! packets" is an external collaborator). The recorder thread only ever
//! talks to a `Source`; it never knows whether packets came from a real
//! network socket or, as in tests, a canned sequence.

use crate::writer::Packet;
use base::Error;

/// Opens a `Source` for one stream's configured URL.
pub trait Opener: Send + Sync + 'static {
    fn open(&self, url: &str) -> Result<Box<dyn Source>, Error>;
}

/// A live or simulated feed of encoded video packets for one recording
/// session. Dropped (and so presumably closed) when the recorder thread
/// moves past it.
pub trait Source: Send {
    /// Blocks until the next packet is available, a transient error occurs
    /// (caller should retry), or the source is permanently exhausted
    /// (`Ok(None)`).
    fn next_packet(&mut self) -> Result<Option<Packet>, Error>;
}

/// Real `Opener` for RTSP URLs. This specification does not cover the
/// demuxer itself; constructing one here would require a network stack and
/// a codec parser neither named in scope nor available in this crate's
/// dependency set. Exists so `recorder::Recorder` has a production-shaped
/// `Opener` to be instantiated with once a real frontend is wired in.
pub struct UnimplementedOpener;

impl Opener for UnimplementedOpener {
    fn open(&self, url: &str) -> Result<Box<dyn Source>, Error> {
        Err(base::err!(
            Unavailable,
            "no stream frontend configured for {url:?}; this build only supports test sources"
        ))
    }
}

#[cfg(test)]
pub mod testutil {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A `Source` that replays a fixed, pre-built sequence of packets, then
    /// reports end-of-stream. Used to drive the recorder thread
    /// deterministically in tests (scenario E1 and friends).
    pub struct CannedSource {
        packets: Mutex<VecDeque<Packet>>,
    }

    impl CannedSource {
        pub fn new(packets: Vec<Packet>) -> Self {
            CannedSource {
                packets: Mutex::new(packets.into()),
            }
        }
    }

    impl Source for CannedSource {
        fn next_packet(&mut self) -> Result<Option<Packet>, Error> {
            Ok(self.packets.lock().unwrap().pop_front())
        }
    }

    /// A `Source` that fails with a transient (`Unavailable`) error
    /// `failures` times before replaying `packets` normally. Used to drive
    /// the recorder thread's backoff-retry path deterministically.
    pub struct FlakySource {
        packets: Mutex<VecDeque<Packet>>,
        failures_left: Mutex<u32>,
    }

    impl FlakySource {
        pub fn new(packets: Vec<Packet>, failures: u32) -> Self {
            FlakySource {
                packets: Mutex::new(packets.into()),
                failures_left: Mutex::new(failures),
            }
        }
    }

    impl Source for FlakySource {
        fn next_packet(&mut self) -> Result<Option<Packet>, Error> {
            let mut failures_left = self.failures_left.lock().unwrap();
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(base::err!(Unavailable, "simulated transient read failure"));
            }
            Ok(self.packets.lock().unwrap().pop_front())
        }
    }

    /// A `Source` that always fails transiently, to exercise the retry
    /// budget running out.
    pub struct AlwaysFlakySource;

    impl Source for AlwaysFlakySource {
        fn next_packet(&mut self) -> Result<Option<Packet>, Error> {
            Err(base::err!(Unavailable, "simulated permanently flaky link"))
        }
    }

    pub struct CannedOpener {
        packets: Mutex<Option<Vec<Packet>>>,
    }

    impl CannedOpener {
        pub fn new(packets: Vec<Packet>) -> Self {
            CannedOpener {
                packets: Mutex::new(Some(packets)),
            }
        }
    }

    impl Opener for CannedOpener {
        fn open(&self, _url: &str) -> Result<Box<dyn Source>, Error> {
            let packets = self
                .packets
                .lock()
                .unwrap()
                .take()
                .expect("CannedOpener.open called more than once");
            Ok(Box::new(CannedSource::new(packets)))
        }
    }

    pub struct FlakyOpener {
        packets: Mutex<Option<Vec<Packet>>>,
        failures: u32,
    }

    impl FlakyOpener {
        pub fn new(packets: Vec<Packet>, failures: u32) -> Self {
            FlakyOpener {
                packets: Mutex::new(Some(packets)),
                failures,
            }
        }
    }

    impl Opener for FlakyOpener {
        fn open(&self, _url: &str) -> Result<Box<dyn Source>, Error> {
            let packets = self
                .packets
                .lock()
                .unwrap()
                .take()
                .expect("FlakyOpener.open called more than once");
            Ok(Box::new(FlakySource::new(packets, self.failures)))
        }
    }

    pub struct AlwaysFlakyOpener;

    impl Opener for AlwaysFlakyOpener {
        fn open(&self, _url: &str) -> Result<Box<dyn Source>, Error> {
            Ok(Box::new(AlwaysFlakySource))
        }
    }
}
