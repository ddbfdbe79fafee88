// This file is part of Sentry NVR, a multi-stream video surveillance recorder.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Bounded pre-detection frame cache per stream (§4.D).

use crate::writer::{Mp4Writer, Packet};
use base::Error;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Hard ceiling on ring buffer capacity regardless of what
/// `pre_buffer_seconds * fps` computes to, so a misconfigured stream can't
/// make the process hold an unbounded amount of frame data in memory.
pub const MAX_PREBUFFER_FRAMES: usize = 1800;

/// Computes a ring buffer's capacity per §8 invariant 5:
/// `min(pre_buffer_seconds * fps, MAX_PREBUFFER_FRAMES)`, floored at 1 so a
/// stream that asks for buffering always gets a usable buffer.
pub fn capacity_for(pre_buffer_seconds: i64, fps: i64) -> usize {
    let wanted = (pre_buffer_seconds.max(0) * fps.max(0)) as usize;
    wanted.clamp(1, MAX_PREBUFFER_FRAMES)
}

/// A bounded FIFO of encoded frames. Overwrites the oldest entry on push
/// once full. `flush_to` drains exactly the prefix present at the moment
/// it acquires the lock — later pushes (even ones racing with a concurrent
/// flush) are never observed by that flush.
pub struct RingBuffer {
    capacity: usize,
    frames: Mutex<VecDeque<Packet>>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            capacity: capacity.max(1),
            frames: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    pub fn push(&self, frame: Packet) {
        let mut frames = self.frames.lock();
        if frames.len() == self.capacity {
            frames.pop_front();
        }
        frames.push_back(frame);
    }

    /// Drains all buffered frames into `writer`, in arrival order, and
    /// empties the buffer. Frames pushed after this call started are not
    /// included even if they arrive before `flush_to` returns.
    pub fn flush_to(&self, writer: &mut dyn Mp4Writer) -> Result<(), Error> {
        let drained: Vec<Packet> = {
            let mut frames = self.frames.lock();
            frames.drain(..).collect()
        };
        for frame in drained {
            writer.write_packet(&frame)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(pts: i64) -> Packet {
        Packet {
            data: vec![0u8; 8],
            pts,
            is_keyframe: pts == 0,
        }
    }

    #[test]
    fn capacity_is_clamped_both_ends() {
        assert_eq!(capacity_for(0, 25), 1);
        assert_eq!(capacity_for(2, 25), 50);
        assert_eq!(capacity_for(1000, 25), MAX_PREBUFFER_FRAMES);
    }

    #[test]
    fn push_overwrites_oldest_when_full() {
        let rb = RingBuffer::new(3);
        for i in 0..5 {
            rb.push(packet(i));
        }
        assert_eq!(rb.len(), 3);
    }

    #[test]
    fn flush_drains_in_arrival_order_and_empties() {
        struct Recording(Vec<i64>);
        impl Mp4Writer for Recording {
            fn write_packet(&mut self, p: &Packet) -> Result<(), Error> {
                self.0.push(p.pts);
                Ok(())
            }
            fn close(&mut self) -> Result<(), Error> {
                Ok(())
            }
            fn output_path(&self) -> &std::path::Path {
                std::path::Path::new("/dev/null")
            }
        }

        let rb = RingBuffer::new(10);
        for i in 0..4 {
            rb.push(packet(i));
        }
        let mut sink = Recording(Vec::new());
        rb.flush_to(&mut sink).unwrap();
        assert_eq!(sink.0, vec![0, 1, 2, 3]);
        assert!(rb.is_empty());
    }
}
