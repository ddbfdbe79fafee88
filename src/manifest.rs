// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! HLS manifest generation and range-aware recording playback (§4.H).

use crate::timeline::Segment;
use base::{bail, err, Error};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Builds timeline manifests under `<storage_root>/timeline_manifests`. The
/// mutex serializes filename generation and file creation so two
/// concurrent requests for the same stream never race on the same path.
pub struct ManifestBuilder {
    storage_root: PathBuf,
    lock: Mutex<()>,
}

impl ManifestBuilder {
    pub fn new(storage_root: PathBuf) -> Self {
        ManifestBuilder {
            storage_root,
            lock: Mutex::new(()),
        }
    }

    /// Writes a manifest for `segments` (oldest-first, non-empty) entered
    /// at `start_time`, returning the path written.
    pub fn build_manifest(
        &self,
        stream: &str,
        segments: &[Segment],
        start_time: i64,
        now: i64,
    ) -> Result<PathBuf, Error> {
        let Some(entry) = select_entry_segment(segments, start_time) else {
            bail!(NotFound, "no segments to build a manifest from");
        };
        let target_duration = segments.iter().map(|s| s.duration).max().unwrap_or(0) + 1;
        let body = format!(
            "#EXTM3U\n\
             #EXT-X-VERSION:3\n\
             #EXT-X-MEDIA-SEQUENCE:0\n\
             #EXT-X-ALLOW-CACHE:YES\n\
             #EXT-X-TARGETDURATION:{target_duration}\n\
             #EXTINF:{duration:.1},\n\
             /api/timeline/play?stream={stream}&start={entry_start}\n\
             #EXT-X-ENDLIST\n",
            duration = entry.duration as f64,
            entry_start = entry.start_time,
        );

        let _guard = self.lock.lock();
        let dir = self.storage_root.join("timeline_manifests");
        std::fs::create_dir_all(&dir).map_err(|e| err!(Internal; source: e))?;
        let path = dir.join(format!("manifest_{now}_{stream}_{start_time}.m3u8"));
        std::fs::write(&path, body).map_err(|e| err!(Internal; source: e))?;
        Ok(path)
    }
}

/// Segment selection for a manifest's entry point (§4.H): the segment
/// containing `start_time`, else the first segment starting after it, else
/// the first segment overall.
fn select_entry_segment(segments: &[Segment], start_time: i64) -> Option<&Segment> {
    segments
        .iter()
        .find(|s| s.start_time <= start_time && s.end_time >= start_time)
        .or_else(|| segments.iter().find(|s| s.start_time > start_time))
        .or_else(|| segments.first())
}

/// Content-type for a recording file, by extension (§6). Used by the web
/// layer's playback handlers, which own the actual range-serving logic.
pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        _ => "video/mp4",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: i64, end: i64) -> Segment {
        Segment {
            id: 1,
            stream: "cam1".to_string(),
            start_time: start,
            end_time: end,
            duration: end - start,
            size: "1000 B".to_string(),
            has_detection: false,
            start_timestamp: String::new(),
            end_timestamp: String::new(),
            local_start_timestamp: String::new(),
            local_end_timestamp: String::new(),
        }
    }

    #[test]
    fn entry_segment_prefers_containing_segment() {
        let segs = vec![seg(100, 160), seg(160, 220), seg(220, 280)];
        let entry = select_entry_segment(&segs, 175).unwrap();
        assert_eq!(entry.start_time, 160);
    }

    #[test]
    fn entry_segment_falls_back_to_first_later_segment() {
        let segs = vec![seg(100, 160), seg(220, 280)];
        let entry = select_entry_segment(&segs, 180).unwrap();
        assert_eq!(entry.start_time, 220);
    }

    #[test]
    fn entry_segment_falls_back_to_first_segment_overall() {
        let segs = vec![seg(100, 160), seg(160, 220)];
        let entry = select_entry_segment(&segs, 5000).unwrap();
        assert_eq!(entry.start_time, 100);
    }

    #[test]
    fn target_duration_is_max_plus_one() {
        let dir = tempfile::TempDir::new().unwrap();
        let builder = ManifestBuilder::new(dir.path().to_path_buf());
        let segs = vec![seg(100, 160), seg(160, 220), seg(220, 280)];
        let path = builder.build_manifest("cam1", &segs, 175, 9999).unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("#EXT-X-TARGETDURATION:61"));
        assert!(body.contains("/api/timeline/play?stream=cam1&start=160"));
        assert!(body.ends_with("#EXT-X-ENDLIST\n"));
    }
}
