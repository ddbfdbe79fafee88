// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod clock;
mod error;
pub mod shutdown;
pub mod strutil;
pub mod time;
pub mod tracing_setup;

pub use crate::error::{Error, ErrorKind};
