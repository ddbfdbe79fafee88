// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! MP4 writer trait boundary (§4.C) and one minimal, concrete
//! implementation.
//!
//! The box-level muxing here is deliberately not a production container
//! writer: it emits an `ftyp`, a single `mdat` of concatenated samples, and
//! a trailing `moov` with a bare-bones sample table, which is enough for
//! the file to be structurally valid and independently playable. A real
//! muxer (handling B-frames, multiple tracks, fragmented output, ...) is
//! out of scope; this type exists so `open`/`write_packet`/`close`/
//! `output_path` are exercised by real file I/O rather than mocked out.

use base::{err, Error, ErrorKind};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Parameters describing the single video track a writer is asked to mux.
#[derive(Clone, Debug)]
pub struct CodecParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// One coded video frame handed to a writer in presentation order.
#[derive(Clone, Debug)]
pub struct Packet {
    pub data: Vec<u8>,
    pub pts: i64,
    pub is_keyframe: bool,
}

/// The contract the recorder thread and ring buffer need from an MP4
/// writer. `close` must be idempotent: calling it twice must not panic, but
/// callers are still responsible for calling it at most once (see
/// `registry::Slot`, which enforces this via `Option::take`).
pub trait Mp4Writer: Send {
    fn write_packet(&mut self, packet: &Packet) -> Result<(), Error>;
    fn close(&mut self) -> Result<(), Error>;
    fn output_path(&self) -> &Path;
}

struct SampleEntry {
    offset: u64,
    size: u32,
    pts: i64,
    is_keyframe: bool,
}

/// Writes one MP4 file to local disk.
pub struct FileMp4Writer {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    params: CodecParams,
    samples: Vec<SampleEntry>,
    mdat_offset: u64,
    closed: bool,
}

const FTYP: &[u8] = b"\0\0\0\x18ftypisom\0\0\x02\0isomiso2mp41";

impl FileMp4Writer {
    pub fn open(path: &Path, params: CodecParams) -> Result<Self, Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| err!(Internal; source: e))?;
        }
        let file = File::create(path).map_err(|e| err!(Internal; source: e))?;
        let mut file = BufWriter::new(file);
        file.write_all(FTYP).map_err(|e| err!(Internal; source: e))?;
        // Placeholder mdat size, patched in on close once the total is known.
        file.write_all(&[0, 0, 0, 0]).map_err(|e| err!(Internal; source: e))?;
        file.write_all(b"mdat").map_err(|e| err!(Internal; source: e))?;
        Ok(FileMp4Writer {
            path: path.to_path_buf(),
            file: Some(file),
            params,
            samples: Vec::new(),
            mdat_offset: FTYP.len() as u64,
            closed: false,
        })
    }
}

impl Mp4Writer for FileMp4Writer {
    fn write_packet(&mut self, packet: &Packet) -> Result<(), Error> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| err!(FailedPrecondition, "write on closed writer"))?;
        let offset = self.mdat_offset + 8 + self.samples.iter().map(|s| s.size as u64).sum::<u64>();
        file.write_all(&packet.data)
            .map_err(|e| err!(Internal; source: e))?;
        self.samples.push(SampleEntry {
            offset,
            size: packet.data.len() as u32,
            pts: packet.pts,
            is_keyframe: packet.is_keyframe,
        });
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            warn!(path = %self.path.display(), "close called twice on mp4 writer");
            return Ok(());
        }
        self.closed = true;
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        let moov = build_moov(&self.params, &self.samples);
        file.write_all(&moov).map_err(|e| err!(Internal; source: e))?;
        file.flush().map_err(|e| err!(Internal; source: e))?;

        let mdat_size = 8 + self.samples.iter().map(|s| s.size as u64).sum::<u64>();
        let mut f = file.into_inner().map_err(|e| err!(Internal; source: e.into_error()))?;
        use std::io::{Seek, SeekFrom};
        f.seek(SeekFrom::Start(self.mdat_offset))
            .map_err(|e| err!(Internal; source: e))?;
        f.write_all(&(mdat_size as u32).to_be_bytes())
            .map_err(|e| err!(Internal; source: e))?;
        f.flush().map_err(|e| err!(Internal; source: e))?;
        Ok(())
    }

    fn output_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileMp4Writer {
    fn drop(&mut self) {
        if !self.closed {
            warn!(path = %self.path.display(), "mp4 writer dropped without close");
        }
    }
}

fn be_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(&((8 + body.len()) as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

/// Builds a bare `moov` atom: one video track, one sample table with a
/// `stsz`/`stco` pair and a naive single-chunk `stsc`. Good enough for
/// playback tools that only need the sample table to locate frames.
fn build_moov(params: &CodecParams, samples: &[SampleEntry]) -> Vec<u8> {
    let duration = samples.last().map(|s| s.pts).unwrap_or(0).max(0) as u32;

    let mut stsz_body = vec![0u8; 4]; // sample_size = 0 (variable)
    stsz_body.extend_from_slice(&(samples.len() as u32).to_be_bytes());
    for s in samples {
        stsz_body.extend_from_slice(&s.size.to_be_bytes());
    }
    let stsz = be_box(b"stsz", &stsz_body);

    let mut stco_body = vec![0u8; 4];
    stco_body.extend_from_slice(&(samples.len() as u32).to_be_bytes());
    for s in samples {
        stco_body.extend_from_slice(&(s.offset as u32).to_be_bytes());
    }
    let stco = be_box(b"stco", &stco_body);

    let mut stsc_body = vec![0u8; 4];
    stsc_body.extend_from_slice(&1u32.to_be_bytes()); // one entry
    stsc_body.extend_from_slice(&1u32.to_be_bytes()); // first_chunk
    stsc_body.extend_from_slice(&(samples.len().max(1) as u32).to_be_bytes());
    stsc_body.extend_from_slice(&1u32.to_be_bytes()); // sample_description_index
    let stsc = be_box(b"stsc", &stsc_body);

    let stts = be_box(b"stts", &[0u8; 8]);

    let mut stbl_body = Vec::new();
    stbl_body.extend_from_slice(&stts);
    stbl_body.extend_from_slice(&stsc);
    stbl_body.extend_from_slice(&stsz);
    stbl_body.extend_from_slice(&stco);
    let stbl = be_box(b"stbl", &stbl_body);

    let mut mdhd_body = vec![0u8; 12];
    mdhd_body.extend_from_slice(&90_000u32.to_be_bytes()); // timescale
    mdhd_body.extend_from_slice(&duration.to_be_bytes());
    mdhd_body.extend_from_slice(&[0u8; 4]);
    let mdhd = be_box(b"mdhd", &mdhd_body);

    let mut vmhd_body = vec![0u8; 4];
    vmhd_body.extend_from_slice(&[0u8; 8]);
    let vmhd = be_box(b"vmhd", &vmhd_body);

    let mut minf_body = Vec::new();
    minf_body.extend_from_slice(&vmhd);
    minf_body.extend_from_slice(&stbl);
    let minf = be_box(b"minf", &minf_body);

    let mut hdlr_body = vec![0u8; 8];
    hdlr_body.extend_from_slice(b"vide");
    hdlr_body.extend_from_slice(&[0u8; 12]);
    hdlr_body.push(0);
    let hdlr = be_box(b"hdlr", &hdlr_body);

    let mut mdia_body = Vec::new();
    mdia_body.extend_from_slice(&mdhd);
    mdia_body.extend_from_slice(&hdlr);
    mdia_body.extend_from_slice(&minf);
    let mdia = be_box(b"mdia", &mdia_body);

    let mut tkhd_body = vec![0u8; 4];
    tkhd_body.extend_from_slice(&[0u8; 8]);
    tkhd_body.extend_from_slice(&1u32.to_be_bytes()); // track_id
    tkhd_body.extend_from_slice(&[0u8; 4]);
    tkhd_body.extend_from_slice(&duration.to_be_bytes());
    tkhd_body.extend_from_slice(&[0u8; 52]);
    tkhd_body.extend_from_slice(&(params.width << 16).to_be_bytes());
    tkhd_body.extend_from_slice(&(params.height << 16).to_be_bytes());
    let tkhd = be_box(b"tkhd", &tkhd_body);

    let mut trak_body = Vec::new();
    trak_body.extend_from_slice(&tkhd);
    trak_body.extend_from_slice(&mdia);
    let trak = be_box(b"trak", &trak_body);

    let mut mvhd_body = vec![0u8; 12];
    mvhd_body.extend_from_slice(&90_000u32.to_be_bytes());
    mvhd_body.extend_from_slice(&duration.to_be_bytes());
    mvhd_body.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate 1.0
    mvhd_body.extend_from_slice(&[0u8; 74]);
    mvhd_body.extend_from_slice(&2u32.to_be_bytes()); // next_track_id
    let mvhd = be_box(b"mvhd", &mvhd_body);

    let mut moov_body = Vec::new();
    moov_body.extend_from_slice(&mvhd);
    moov_body.extend_from_slice(&trak);
    be_box(b"moov", &moov_body)
}
