// SPDX-License-Identifier: MIT
// Copyright (c) 2024 Takashi Sakamoto

//! The frame ring and its embedded DLL, tied together behind the
//! `TimestampedBuffer` public contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use ieee1394_cycle_timer::Timestamp;

use crate::dll::{wrap, BandwidthError, Dll};
use crate::ring::{FrameRing, RingError};

/// Frames per cluster-aligned process block, fixed so the AM824 MIDI
/// demultiplexer always sees whole 8-frame TDM groups.
pub const FRAMES_PER_PROCESS_BLOCK: usize = 8;

#[derive(Debug)]
pub struct ConfigError(pub &'static str);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid timestamped buffer configuration: {} must be non-zero", self.0)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug)]
pub enum BufferError {
    Overrun(RingError),
    Underrun(RingError),
    NotClusterAligned { frames: usize },
    Client(String),
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::Overrun(e) => write!(f, "{e}"),
            BufferError::Underrun(e) => write!(f, "{e}"),
            BufferError::NotClusterAligned { frames } => write!(
                f,
                "{frames} frames is not a multiple of the {FRAMES_PER_PROCESS_BLOCK}-frame process block"
            ),
            BufferError::Client(msg) => write!(f, "client callback failed: {msg}"),
        }
    }
}

impl std::error::Error for BufferError {}

/// Callback capability passed by short-lived reference to the zero-copy
/// `block_process_*` calls. The buffer never owns the client, avoiding the
/// reference cycle a stored callback would create.
pub trait BlockProcessClient {
    fn process_write_block(&mut self, buf: &mut [u8], n_frames: usize, offset: usize) -> Result<(), String>;
    fn process_read_block(&mut self, buf: &[u8], n_frames: usize, offset: usize) -> Result<(), String>;
}

/// Validated, immutable sizing and rate parameters. `prepare()` consumes
/// this to allocate the ring and cluster scratch and produce a ready
/// `TimestampedBuffer`.
pub struct TimestampedBufferConfig {
    event_size: usize,
    events_per_frame: usize,
    buffer_size: usize,
    nominal_rate: f64,
    update_period: u32,
    wrap_at: f64,
}

impl TimestampedBufferConfig {
    pub fn new(
        event_size: usize,
        events_per_frame: usize,
        buffer_size: usize,
        nominal_rate: f64,
        update_period: u32,
        wrap_at: f64,
    ) -> Result<Self, ConfigError> {
        if event_size == 0 {
            return Err(ConfigError("event_size"));
        }
        if events_per_frame == 0 {
            return Err(ConfigError("events_per_frame"));
        }
        if buffer_size == 0 {
            return Err(ConfigError("buffer_size"));
        }
        if nominal_rate == 0.0 {
            return Err(ConfigError("nominal_rate"));
        }
        if update_period == 0 {
            return Err(ConfigError("update_period"));
        }
        if wrap_at == 0.0 {
            return Err(ConfigError("wrap_at"));
        }
        Ok(TimestampedBufferConfig {
            event_size,
            events_per_frame,
            buffer_size,
            nominal_rate,
            update_period,
            wrap_at,
        })
    }

    /// Allocates the ring (`events_per_frame * buffer_size * event_size`
    /// bytes) and the cluster scratch buffers (`8 * events_per_frame *
    /// event_size` bytes each), and seeds the DLL.
    pub fn prepare(self) -> TimestampedBuffer {
        let frame_bytes = self.event_size * self.events_per_frame;
        let cluster_bytes = FRAMES_PER_PROCESS_BLOCK * frame_bytes;
        TimestampedBuffer {
            frame_bytes,
            update_period: self.update_period,
            wrap_at: self.wrap_at,
            ring: FrameRing::new(self.buffer_size, frame_bytes),
            transparent: AtomicBool::new(false),
            snap_rate_on_deviation: AtomicBool::new(false),
            write_scratch: Mutex::new(vec![0u8; cluster_bytes]),
            read_scratch: Mutex::new(vec![0u8; cluster_bytes]),
            scalar: Mutex::new(ScalarState {
                dll: Dll::new(self.nominal_rate, self.update_period, self.wrap_at),
                framecounter: 0,
                tick_offset: 0,
            }),
        }
    }
}

struct ScalarState {
    dll: Dll,
    framecounter: u32,
    /// Fixed bias folded into every timestamp read out, per
    /// `set_tick_offset`.
    tick_offset: i64,
}

/// A frame-indexed SPSC ring with an embedded DLL estimating the
/// timestamp of every frame it holds.
///
/// The ring itself (`FrameRing`) is lock-free. The `(framecounter, tail_ts,
/// next_tail_ts, rate, e2)` tuple lives behind a short mutex so
/// `buffer_*_timestamp()` readers see a consistent snapshot; contention on
/// that lock is limited to O(1) work per call.
pub struct TimestampedBuffer {
    frame_bytes: usize,
    update_period: u32,
    wrap_at: f64,
    ring: FrameRing,
    transparent: AtomicBool,
    /// When set, a DLL update that diverges from nominal by more than
    /// [`crate::dll::LOCK_LOSS_FRACTION`] snaps `rate` back to nominal
    /// instead of continuing to track the measured value (spec.md §9 open
    /// question, resolved as `EngineConfig::snap_rate_on_deviation`).
    snap_rate_on_deviation: AtomicBool,
    write_scratch: Mutex<Vec<u8>>,
    read_scratch: Mutex<Vec<u8>>,
    scalar: Mutex<ScalarState>,
}

impl TimestampedBuffer {
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn capacity_frames(&self) -> usize {
        self.ring.capacity_frames()
    }

    pub fn buffer_fill(&self) -> usize {
        self.ring.occupied_frames()
    }

    /// While enabled, `write_frames` drops its payload but still advances
    /// the DLL from the timestamps it is given, so the timeline keeps
    /// moving during a disabled pass-through.
    pub fn set_transparent(&self, on: bool) {
        self.transparent.store(on, Ordering::Relaxed);
    }

    /// Wires `EngineConfig::snap_rate_on_deviation` into the DLL: when on,
    /// every update step that crosses the lock-loss threshold snaps `rate`
    /// back to nominal immediately after logging the divergence warning.
    pub fn set_snap_rate_on_deviation(&self, on: bool) {
        self.snap_rate_on_deviation.store(on, Ordering::Relaxed);
    }

    pub fn set_bandwidth(&self, bandwidth_hz: f64) -> Result<(), BandwidthError> {
        self.scalar.lock().unwrap().dll.set_bandwidth(bandwidth_hz)
    }

    pub fn bandwidth(&self) -> f64 {
        self.scalar.lock().unwrap().dll.bandwidth()
    }

    pub fn set_tail_timestamp(&self, ts: Timestamp) {
        self.scalar.lock().unwrap().dll.seed_tail(ts.as_f64());
    }

    pub fn set_head_timestamp(&self, ts: Timestamp) {
        let mut state = self.scalar.lock().unwrap();
        let framecounter = state.framecounter;
        state.dll.seed_head(ts.as_f64(), framecounter);
    }

    /// A fixed tick bias applied to every timestamp handed back by
    /// `timestamp_from_tail`/`timestamp_from_head` (and hence
    /// `buffer_head_timestamp`/`buffer_tail_timestamp`), compensating for a
    /// constant presentation-time offset such as driver-level latency.
    pub fn set_tick_offset(&self, ticks: i64) {
        self.scalar.lock().unwrap().tick_offset = ticks;
    }

    pub fn tick_offset(&self) -> i64 {
        self.scalar.lock().unwrap().tick_offset
    }

    fn increment_frame_counter(&self, n: u32, ts_new: f64) {
        let mut state = self.scalar.lock().unwrap();
        state.framecounter += n;
        if n == state.dll.update_period() {
            state.dll.update(ts_new);
            if self.snap_rate_on_deviation.load(Ordering::Relaxed) && state.dll.is_diverged() {
                state.dll.snap_rate_to_nominal();
            }
        } else {
            state.dll.advance_tail_without_update(ts_new);
        }
    }

    pub fn write_frames(&self, n: usize, src: &[u8], ts: Timestamp) -> Result<(), BufferError> {
        if self.transparent.load(Ordering::Relaxed) {
            self.scalar.lock().unwrap().dll.seed_tail(ts.as_f64());
            return Ok(());
        }
        self.ring.write(src).map_err(BufferError::Overrun)?;
        self.increment_frame_counter(n as u32, ts.as_f64());
        Ok(())
    }

    pub fn read_frames(&self, n: usize, dst: &mut [u8]) -> Result<(), BufferError> {
        self.ring.read(n, dst).map_err(BufferError::Underrun)?;
        let mut state = self.scalar.lock().unwrap();
        state.framecounter = state.framecounter.saturating_sub(n as u32);
        Ok(())
    }

    /// Inserts `n` frames without advancing the DLL. `keep_head_ts` selects
    /// whether the head timestamp (true) or the tail timestamp (false)
    /// stays unchanged across the insertion.
    pub fn preload_frames(&self, n: usize, src: &[u8], keep_head_ts: bool) -> Result<(), BufferError> {
        self.ring.write(src).map_err(BufferError::Overrun)?;
        let mut state = self.scalar.lock().unwrap();
        state.framecounter += n as u32;
        if keep_head_ts {
            let rate = state.dll.rate();
            state.dll.shift_tail(rate * n as f64);
        }
        Ok(())
    }

    pub fn drop_frames(&self, n: usize) -> Result<(), BufferError> {
        self.ring.drop_frames(n).map_err(BufferError::Underrun)?;
        let mut state = self.scalar.lock().unwrap();
        state.framecounter = state.framecounter.saturating_sub(n as u32);
        Ok(())
    }

    /// Clears resident frames and the frame counter, keeping the
    /// configuration (ring capacity, frame layout, DLL coefficients).
    pub fn reset(&self) {
        self.ring.clear();
        self.scalar.lock().unwrap().framecounter = 0;
    }

    /// Zero-copy write path: fills the ring in `FRAMES_PER_PROCESS_BLOCK`-
    /// frame clusters, handing each cluster's bytes to `client` before
    /// committing them to the ring.
    pub fn block_process_write(
        &self,
        n: usize,
        ts: Timestamp,
        client: &mut dyn BlockProcessClient,
    ) -> Result<(), BufferError> {
        if n % FRAMES_PER_PROCESS_BLOCK != 0 {
            return Err(BufferError::NotClusterAligned { frames: n });
        }
        let cluster_bytes = FRAMES_PER_PROCESS_BLOCK * self.frame_bytes;
        let mut scratch = self.write_scratch.lock().unwrap();
        let mut offset = 0;
        while offset < n {
            client
                .process_write_block(&mut scratch[..cluster_bytes], FRAMES_PER_PROCESS_BLOCK, offset)
                .map_err(BufferError::Client)?;
            self.ring.write(&scratch[..cluster_bytes]).map_err(BufferError::Overrun)?;
            offset += FRAMES_PER_PROCESS_BLOCK;
        }
        drop(scratch);
        self.increment_frame_counter(n as u32, ts.as_f64());
        Ok(())
    }

    /// Zero-copy read path: drains the ring in cluster-aligned chunks,
    /// handing each chunk's bytes to `client`.
    pub fn block_process_read(&self, n: usize, client: &mut dyn BlockProcessClient) -> Result<(), BufferError> {
        if n % FRAMES_PER_PROCESS_BLOCK != 0 {
            return Err(BufferError::NotClusterAligned { frames: n });
        }
        let cluster_bytes = FRAMES_PER_PROCESS_BLOCK * self.frame_bytes;
        let mut scratch = self.read_scratch.lock().unwrap();
        let mut offset = 0;
        while offset < n {
            self.ring
                .read(FRAMES_PER_PROCESS_BLOCK, &mut scratch[..cluster_bytes])
                .map_err(BufferError::Underrun)?;
            client
                .process_read_block(&scratch[..cluster_bytes], FRAMES_PER_PROCESS_BLOCK, offset)
                .map_err(BufferError::Client)?;
            offset += FRAMES_PER_PROCESS_BLOCK;
        }
        drop(scratch);
        let mut state = self.scalar.lock().unwrap();
        state.framecounter = state.framecounter.saturating_sub(n as u32);
        Ok(())
    }

    fn apply_tick_offset(&self, ts: f64, offset: i64) -> Timestamp {
        Timestamp::from_f64(wrap(ts + offset as f64, self.wrap_at), self.wrap_at)
    }

    /// `(timestamp, framecounter)` of the most recently written frame.
    pub fn buffer_tail_timestamp(&self) -> (Timestamp, u32) {
        let state = self.scalar.lock().unwrap();
        let ts = state.dll.timestamp_from_tail(0.0);
        (self.apply_tick_offset(ts, state.tick_offset), state.framecounter)
    }

    /// `(timestamp, framecounter)` of the oldest resident frame.
    pub fn buffer_head_timestamp(&self) -> (Timestamp, u32) {
        let state = self.scalar.lock().unwrap();
        let ts = state.dll.timestamp_from_tail(state.framecounter as f64);
        (self.apply_tick_offset(ts, state.tick_offset), state.framecounter)
    }

    pub fn timestamp_from_tail(&self, k: f64) -> Timestamp {
        let state = self.scalar.lock().unwrap();
        let ts = state.dll.timestamp_from_tail(k);
        self.apply_tick_offset(ts, state.tick_offset)
    }

    pub fn timestamp_from_head(&self, k: f64) -> Timestamp {
        let state = self.scalar.lock().unwrap();
        let ts = state.dll.timestamp_from_tail(state.framecounter as f64 - k);
        self.apply_tick_offset(ts, state.tick_offset)
    }

    pub fn rate(&self) -> f64 {
        self.scalar.lock().unwrap().dll.rate()
    }

    pub fn snap_rate_to_nominal(&self) {
        self.scalar.lock().unwrap().dll.snap_rate_to_nominal();
    }

    pub fn update_period(&self) -> u32 {
        self.update_period
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_buffer() -> TimestampedBuffer {
        TimestampedBufferConfig::new(4, 2, 64, 512.0, 8, 128.0 * 24_576_000.0)
            .unwrap()
            .prepare()
    }

    fn ts(ticks: f64) -> Timestamp {
        Timestamp::from_f64(ticks, 128.0 * 24_576_000.0)
    }

    #[test]
    fn s1_ring_write_read_round_trip() {
        let buf = make_buffer();
        let pattern: Vec<u8> = (0..64u8).collect();
        buf.write_frames(8, &pattern, ts(8.0 * 512.0)).unwrap();
        assert_eq!(buf.buffer_fill(), 8);
        let (tail_ts, fc) = buf.buffer_tail_timestamp();
        assert_eq!(tail_ts.ticks(), 4096);
        assert_eq!(fc, 8);
        let mut out = vec![0u8; 64];
        buf.read_frames(8, &mut out).unwrap();
        assert_eq!(buf.buffer_fill(), 0);
        assert_eq!(out, pattern);
    }

    #[test]
    fn invariant_framecounter_equals_writes_minus_reads() {
        let buf = make_buffer();
        let pattern = vec![0u8; 64];
        buf.write_frames(8, &pattern, ts(4096.0)).unwrap();
        buf.write_frames(8, &pattern, ts(8192.0)).unwrap();
        let mut out = vec![0u8; 32];
        buf.read_frames(4, &mut out).unwrap();
        let (_, fc) = buf.buffer_tail_timestamp();
        assert_eq!(fc, 12);
    }

    #[test]
    fn invariant_head_timestamp_matches_formula() {
        let buf = make_buffer();
        let pattern = vec![0u8; 64];
        buf.write_frames(8, &pattern, ts(4096.0)).unwrap();
        let (tail_ts, fc) = buf.buffer_tail_timestamp();
        let rate = buf.rate();
        let (head_ts, _) = buf.buffer_head_timestamp();
        let expected = (tail_ts.as_f64() - fc as f64 * rate).rem_euclid(128.0 * 24_576_000.0);
        assert!((head_ts.as_f64() - expected).abs() < 1e-6);
    }

    #[test]
    fn timestamp_from_tail_stays_in_wrap_range() {
        let buf = make_buffer();
        let pattern = vec![0u8; 64];
        buf.write_frames(8, &pattern, ts(4096.0)).unwrap();
        let wrap_at = 128.0 * 24_576_000.0;
        for k in 0..8 {
            let out = buf.timestamp_from_tail(k as f64);
            assert!(out.as_f64() >= 0.0 && out.as_f64() < wrap_at);
        }
    }

    #[test]
    fn overrun_is_reported_without_panicking() {
        let buf = TimestampedBufferConfig::new(4, 2, 8, 512.0, 8, 128.0 * 24_576_000.0)
            .unwrap()
            .prepare();
        let pattern = vec![0u8; 64];
        buf.write_frames(8, &pattern, ts(4096.0)).unwrap();
        assert!(buf.write_frames(8, &pattern, ts(8192.0)).is_err());
    }

    #[test]
    fn underrun_is_reported_without_panicking() {
        let buf = make_buffer();
        let mut out = vec![0u8; 32];
        assert!(buf.read_frames(4, &mut out).is_err());
    }

    struct Passthrough;
    impl BlockProcessClient for Passthrough {
        fn process_write_block(&mut self, buf: &mut [u8], _n_frames: usize, offset: usize) -> Result<(), String> {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = (offset + i) as u8;
            }
            Ok(())
        }
        fn process_read_block(&mut self, _buf: &[u8], _n_frames: usize, _offset: usize) -> Result<(), String> {
            Ok(())
        }
    }

    #[test]
    fn block_process_write_then_read_round_trips_like_write_frames() {
        let buf = make_buffer();
        let mut client = Passthrough;
        buf.block_process_write(8, ts(4096.0), &mut client).unwrap();
        assert_eq!(buf.buffer_fill(), 8);
        let mut out = vec![0u8; 64];
        buf.read_frames(8, &mut out).unwrap();
        let expected: Vec<u8> = (0..64u8).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn rejects_non_cluster_aligned_block_process_call() {
        let buf = make_buffer();
        let mut client = Passthrough;
        assert!(buf.block_process_write(3, ts(4096.0), &mut client).is_err());
    }

    #[test]
    fn preload_keeping_head_timestamp_shifts_tail_forward() {
        let buf = make_buffer();
        let pattern = vec![0u8; 64];
        buf.write_frames(8, &pattern, ts(4096.0)).unwrap();
        let (head_before, _) = buf.buffer_head_timestamp();
        buf.preload_frames(8, &pattern, true).unwrap();
        let (head_after, _) = buf.buffer_head_timestamp();
        assert!((head_after.as_f64() - head_before.as_f64()).abs() < 1e-6);
    }

    #[test]
    fn snap_rate_on_deviation_pulls_rate_back_to_nominal() {
        let buf = make_buffer();
        buf.set_snap_rate_on_deviation(true);
        let pattern = vec![0u8; 64];
        // Nominal rate is 512.0 ticks/frame; feed an update implying a rate
        // far more than 10% away from nominal to trip lock-loss detection.
        buf.write_frames(8, &pattern, ts(8.0 * 2000.0)).unwrap();
        assert!((buf.rate() - 512.0).abs() < 1e-6, "rate should have snapped back to nominal");
    }

    #[test]
    fn without_the_flag_a_diverged_rate_keeps_tracking() {
        let buf = make_buffer();
        let pattern = vec![0u8; 64];
        buf.write_frames(8, &pattern, ts(8.0 * 2000.0)).unwrap();
        assert!((buf.rate() - 512.0).abs() > 1.0, "rate should have tracked the diverged timestamps");
    }

    #[test]
    fn tick_offset_shifts_reported_timestamps() {
        let buf = make_buffer();
        let pattern = vec![0u8; 64];
        buf.write_frames(8, &pattern, ts(4096.0)).unwrap();
        let (without_offset, _) = buf.buffer_tail_timestamp();
        buf.set_tick_offset(100);
        let (with_offset, _) = buf.buffer_tail_timestamp();
        assert_eq!(with_offset.ticks(), without_offset.ticks() + 100);
    }
}
