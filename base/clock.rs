// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Clock interface and implementations for testability.

use jiff::{SignedDuration, Timestamp};
use parking_lot::Mutex;
use std::mem;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration as StdDuration;
use tracing::warn;

use crate::error::Error;
use crate::shutdown::ShutdownError;

/// Abstract interface to the system clocks. This exists so recorder logic
/// can be driven by a `SimulatedClocks` in tests instead of waiting on the
/// real wall clock.
pub trait Clocks: Send + Sync + 'static {
    /// Gets the current time from `CLOCK_REALTIME`.
    fn realtime(&self) -> Timestamp;

    /// Gets the current time from a monotonic clock.
    ///
    /// On Linux, this uses `CLOCK_BOOTTIME`, which includes suspended time.
    /// On other systems, it uses `CLOCK_MONOTONIC`.
    fn monotonic(&self) -> Timestamp;

    /// Causes the current thread to sleep for the specified time.
    fn sleep(&self, how_long: StdDuration);
}

/// Extension of [`Clocks`] with a generic method, kept separate so that
/// `Clocks` itself remains dyn-compatible.
pub trait ClocksRecv: Clocks {
    /// Calls `rcv.recv_timeout` or substitutes a test implementation.
    fn recv_timeout<T>(
        &self,
        rcv: &mpsc::Receiver<T>,
        timeout: StdDuration,
    ) -> Result<T, mpsc::RecvTimeoutError>;
}

/// Repeatedly calls `f` until it succeeds, sleeping a second between tries
/// and bailing out early if a shutdown is requested.
pub fn retry<T, E>(
    clocks: &dyn Clocks,
    shutdown_rx: &crate::shutdown::Receiver,
    f: &mut dyn FnMut() -> Result<T, E>,
) -> Result<T, ShutdownError>
where
    E: Into<Error>,
{
    loop {
        let e = match f() {
            Ok(t) => return Ok(t),
            Err(e) => e.into(),
        };
        shutdown_rx.check()?;
        warn!(exception = %e.chain(), "sleeping for 1 s after error");
        clocks.sleep(StdDuration::from_secs(1));
    }
}

#[derive(Copy, Clone, Default)]
pub struct RealClocks {}

impl RealClocks {
    fn get(&self, clock: libc::clockid_t) -> Timestamp {
        unsafe {
            let mut ts = mem::MaybeUninit::uninit();
            assert_eq!(0, libc::clock_gettime(clock, ts.as_mut_ptr()));
            let ts = ts.assume_init();
            Timestamp::new(
                #[allow(clippy::useless_conversion)]
                ts.tv_sec.into(),
                ts.tv_nsec as i32,
            )
            .expect("kernel-supplied timespec is in range")
        }
    }
}

impl Clocks for RealClocks {
    fn realtime(&self) -> Timestamp {
        self.get(libc::CLOCK_REALTIME)
    }

    #[cfg(target_os = "linux")]
    fn monotonic(&self) -> Timestamp {
        self.get(libc::CLOCK_BOOTTIME)
    }

    #[cfg(not(target_os = "linux"))]
    fn monotonic(&self) -> Timestamp {
        self.get(libc::CLOCK_MONOTONIC)
    }

    fn sleep(&self, how_long: StdDuration) {
        thread::sleep(how_long);
    }
}

impl ClocksRecv for RealClocks {
    fn recv_timeout<T>(
        &self,
        rcv: &mpsc::Receiver<T>,
        timeout: StdDuration,
    ) -> Result<T, mpsc::RecvTimeoutError> {
        rcv.recv_timeout(timeout)
    }
}

/// Logs a warning if the guard lives "too long", using the label created by a supplied
/// function. Dropped at the end of any code path worth timing.
pub struct TimerGuard<'a, C: Clocks + ?Sized, S: AsRef<str>, F: FnOnce() -> S + 'a> {
    clocks: &'a C,
    label_f: Option<F>,
    start: Timestamp,
}

impl<'a, C: Clocks + ?Sized, S: AsRef<str>, F: FnOnce() -> S + 'a> TimerGuard<'a, C, S, F> {
    pub fn new(clocks: &'a C, label_f: F) -> Self {
        TimerGuard {
            clocks,
            label_f: Some(label_f),
            start: clocks.monotonic(),
        }
    }
}

impl<'a, C, S, F> Drop for TimerGuard<'a, C, S, F>
where
    C: Clocks + ?Sized,
    S: AsRef<str>,
    F: FnOnce() -> S + 'a,
{
    fn drop(&mut self) {
        let elapsed = self.clocks.monotonic().duration_since(self.start);
        if elapsed.as_secs() >= 1 {
            let label_f = self.label_f.take().unwrap();
            warn!("{} took {:?}!", label_f().as_ref(), elapsed);
        }
    }
}

/// Simulated clock for testing. Time only advances when `sleep` is called
/// (directly, or indirectly via `recv_timeout` timing out), so recorder
/// threads driven by this clock run deterministically under test.
#[derive(Clone)]
pub struct SimulatedClocks(Arc<SimulatedClocksInner>);

struct SimulatedClocksInner {
    boot: Timestamp,
    uptime: Mutex<SignedDuration>,
}

impl SimulatedClocks {
    pub fn new(boot: Timestamp) -> Self {
        SimulatedClocks(Arc::new(SimulatedClocksInner {
            boot,
            uptime: Mutex::new(SignedDuration::ZERO),
        }))
    }
}

impl Clocks for SimulatedClocks {
    fn realtime(&self) -> Timestamp {
        self.0.boot.checked_add(*self.0.uptime.lock()).unwrap()
    }

    fn monotonic(&self) -> Timestamp {
        Timestamp::UNIX_EPOCH
            .checked_add(*self.0.uptime.lock())
            .unwrap()
    }

    /// Advances the clock by the specified amount without actually sleeping.
    fn sleep(&self, how_long: StdDuration) {
        let mut l = self.0.uptime.lock();
        *l = l.checked_add(SignedDuration::try_from(how_long).unwrap()).unwrap();
    }
}

impl ClocksRecv for SimulatedClocks {
    /// Advances the clock by the specified amount if data is not immediately available.
    fn recv_timeout<T>(
        &self,
        rcv: &mpsc::Receiver<T>,
        timeout: StdDuration,
    ) -> Result<T, mpsc::RecvTimeoutError> {
        let r = rcv.recv_timeout(StdDuration::new(0, 0));
        if r.is_err() {
            self.sleep(timeout);
        }
        r
    }
}
