// SPDX-License-Identifier: MIT
// Copyright (c) 2024 Takashi Sakamoto

//! A lock-free, single-producer/single-consumer byte ring addressed in
//! whole frames. Frame data itself needs no synchronization beyond the
//! atomic cursors here; the DLL/timestamp tuple that rides alongside it is
//! guarded separately, by [`crate::buffer::TimestampedBuffer`].

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Eq, PartialEq)]
pub enum RingError {
    Overrun { requested: usize, free: usize },
    Underrun { requested: usize, available: usize },
}

impl std::fmt::Display for RingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RingError::Overrun { requested, free } => {
                write!(f, "ring overrun: {requested} frames requested, {free} free")
            }
            RingError::Underrun { requested, available } => {
                write!(
                    f,
                    "ring underrun: {requested} frames requested, {available} available"
                )
            }
        }
    }
}

impl std::error::Error for RingError {}

/// Frame-addressable SPSC ring. One thread may call the `write_*` methods,
/// one (possibly different) thread may call the `read_*` methods; both may
/// call the read-only accessors concurrently.
pub struct FrameRing {
    data: UnsafeCell<Box<[u8]>>,
    frame_bytes: usize,
    capacity_frames: usize,
    written: AtomicUsize,
    read: AtomicUsize,
}

unsafe impl Send for FrameRing {}
unsafe impl Sync for FrameRing {}

impl FrameRing {
    pub fn new(capacity_frames: usize, frame_bytes: usize) -> Self {
        assert!(capacity_frames > 0 && frame_bytes > 0);
        FrameRing {
            data: UnsafeCell::new(vec![0u8; capacity_frames * frame_bytes].into_boxed_slice()),
            frame_bytes,
            capacity_frames,
            written: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Frames currently resident: written but not yet read.
    pub fn occupied_frames(&self) -> usize {
        self.written.load(Ordering::Acquire) - self.read.load(Ordering::Acquire)
    }

    pub fn free_frames(&self) -> usize {
        self.capacity_frames - self.occupied_frames()
    }

    fn slot(&self, frame_index: usize) -> usize {
        (frame_index % self.capacity_frames) * self.frame_bytes
    }

    /// Copies `src` (a whole number of frames) into the ring, wrapping as
    /// needed. `src.len()` must be a multiple of `frame_bytes`.
    pub fn write(&self, src: &[u8]) -> Result<(), RingError> {
        assert_eq!(src.len() % self.frame_bytes, 0);
        let n = src.len() / self.frame_bytes;
        let free = self.free_frames();
        if n > free {
            return Err(RingError::Overrun { requested: n, free });
        }
        // SAFETY: single writer; the region [write_pos, write_pos+n) is
        // disjoint from the reader's region because `free_frames` bounded
        // `n` against the occupancy the reader has not yet claimed.
        let data = unsafe { &mut *self.data.get() };
        let written = self.written.load(Ordering::Relaxed);
        let start = self.slot(written);
        let end = start + src.len();
        if end <= data.len() {
            data[start..end].copy_from_slice(src);
        } else {
            let first_len = data.len() - start;
            data[start..].copy_from_slice(&src[..first_len]);
            data[..src.len() - first_len].copy_from_slice(&src[first_len..]);
        }
        self.written.store(written + n, Ordering::Release);
        Ok(())
    }

    /// Copies `n` frames out of the ring head into `dst`, wrapping as
    /// needed. `dst.len()` must equal `n * frame_bytes`.
    pub fn read(&self, n: usize, dst: &mut [u8]) -> Result<(), RingError> {
        assert_eq!(dst.len(), n * self.frame_bytes);
        let available = self.occupied_frames();
        if n > available {
            return Err(RingError::Underrun { requested: n, available });
        }
        let data = unsafe { &*self.data.get() };
        let read = self.read.load(Ordering::Relaxed);
        let start = self.slot(read);
        let end = start + dst.len();
        if end <= data.len() {
            dst.copy_from_slice(&data[start..end]);
        } else {
            let first_len = data.len() - start;
            dst[..first_len].copy_from_slice(&data[start..]);
            dst[first_len..].copy_from_slice(&data[..dst.len() - first_len]);
        }
        self.read.store(read + n, Ordering::Release);
        Ok(())
    }

    /// Discards `n` head frames without copying them out.
    pub fn drop_frames(&self, n: usize) -> Result<(), RingError> {
        let available = self.occupied_frames();
        if n > available {
            return Err(RingError::Underrun { requested: n, available });
        }
        self.read.store(self.read.load(Ordering::Relaxed) + n, Ordering::Release);
        Ok(())
    }

    /// Resets both cursors to zero, discarding any resident frames. Only
    /// safe to call with both producer and consumer quiesced.
    pub fn clear(&self) {
        self.written.store(0, Ordering::Relaxed);
        self.read.store(0, Ordering::Relaxed);
    }
}
