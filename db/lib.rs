// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod model;
pub mod recordings;
pub mod schema;
pub mod streams;

// Used by this crate's own #[cfg(test)] modules and by the dependent
// binary crate's integration tests; see testutil.rs for why it isn't
// #[cfg(test)]-gated.
pub mod testutil;

pub use crate::model::{EventKind, SegmentMeta, StreamConfig};
pub use crate::recordings::{Order, RecordingCatalog};
pub use crate::streams::StreamStore;
