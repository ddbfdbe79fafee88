// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-memory representations of the rows this crate persists.

use derive_more::Display;

/// Default values used when an optional column is absent from an older
/// schema. Also the defaults a freshly-constructed `StreamConfig` gets when
/// a caller doesn't specify them.
pub mod defaults {
    pub const DETECTION_THRESHOLD: f64 = 0.5;
    pub const DETECTION_INTERVAL: i64 = 10;
    pub const PRE_BUFFER_SECONDS: i64 = 0;
    pub const POST_BUFFER_SECONDS: i64 = 3;
    pub const PROTOCOL: &str = "tcp";
}

#[derive(Clone, Debug, PartialEq)]
pub struct StreamConfig {
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub streaming_enabled: bool,
    pub width: i64,
    pub height: i64,
    pub fps: i64,
    pub codec: String,
    pub priority: i64,
    pub record: bool,
    pub segment_duration: i64,
    pub detection_based_recording: bool,
    pub detection_model: String,
    pub detection_threshold: f64,
    pub detection_interval: i64,
    pub pre_detection_buffer: i64,
    pub post_detection_buffer: i64,
    pub protocol: String,
    pub is_onvif: bool,
    pub record_audio: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            name: String::new(),
            url: String::new(),
            enabled: true,
            streaming_enabled: true,
            width: 0,
            height: 0,
            fps: 0,
            codec: String::new(),
            priority: 0,
            record: true,
            segment_duration: 60,
            detection_based_recording: false,
            detection_model: String::new(),
            detection_threshold: defaults::DETECTION_THRESHOLD,
            detection_interval: defaults::DETECTION_INTERVAL,
            pre_detection_buffer: defaults::PRE_BUFFER_SECONDS,
            post_detection_buffer: defaults::POST_BUFFER_SECONDS,
            protocol: defaults::PROTOCOL.to_string(),
            is_onvif: false,
            record_audio: false,
        }
    }
}

/// A completed, immutable segment of recorded video.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentMeta {
    pub id: i64,
    pub stream: String,
    pub file_path: String,
    pub start_time: i64,
    pub end_time: i64,
    pub size_bytes: i64,
    pub has_detection: bool,
}

/// Kinds of rows written to the write-only `events` audit log.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Display)]
pub enum EventKind {
    #[display("RECORDING_START")]
    RecordingStart,
    #[display("RECORDING_STOP")]
    RecordingStop,
    #[display("WRITER_FINALIZE_FAILED")]
    WriterFinalizeFailed,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::RecordingStart => "RECORDING_START",
            EventKind::RecordingStop => "RECORDING_STOP",
            EventKind::WriterFinalizeFailed => "WRITER_FINALIZE_FAILED",
        }
    }
}
