// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Polymorphic receive variant for chipsets (the Oxford Semiconductor
//! family) that emit non-blocking AM824 without a trustworthy SYT field.
//! Substitutes a per-packet arrival-time DLL for SYT parsing, staging
//! payload until one full SYT interval of frames is present before handing
//! a synthetic timestamp to the shared `TimestampedBuffer` machinery.

use ieee1394_cycle_timer::{diff_ticks, Timestamp};

use amdtp_timestamped_buffer::TimestampedBufferConfig;

use crate::processor::{BlockingMode, SpDirection, SpError, StreamProcessor};

const WRAP_TICKS: f64 = 128.0 * 24_576_000.0;
/// Causality backoff: two cycles, per spec.md §4.4.
const CAUSALITY_BACKOFF_TICKS: f64 = 2.0 * 3072.0;

/// A minimal second-order DLL tracking packet arrival time rather than
/// per-frame sample rate. Same predictor-corrector shape as the buffer's
/// embedded DLL (`amdtp_timestamped_buffer`'s private `Dll`), reimplemented
/// here since that type isn't exported: its state space (ticks-per-packet
/// instead of ticks-per-frame) doesn't fit the `TimestampedBuffer`'s own
/// DLL contract.
struct ArrivalDll {
    b: f64,
    c: f64,
    e2: f64,
    tail_ts: u32,
    next_tail_ts: u32,
}

impl ArrivalDll {
    fn new(nominal_ticks_per_packet: f64, bandwidth_hz: f64) -> Self {
        let big_omega = 2.0 * std::f64::consts::PI * bandwidth_hz * nominal_ticks_per_packet;
        ArrivalDll {
            b: std::f64::consts::SQRT_2 * big_omega,
            c: big_omega * big_omega,
            e2: nominal_ticks_per_packet,
            tail_ts: 0,
            next_tail_ts: (nominal_ticks_per_packet.round() as u32) % (WRAP_TICKS as u32),
        }
    }

    fn update(&mut self, ts_new: u32) {
        let err = diff_ticks(ts_new, self.next_tail_ts);
        self.tail_ts = self.next_tail_ts;
        let next = self.next_tail_ts as f64 + self.b * err as f64 + self.e2;
        self.next_tail_ts = next.rem_euclid(WRAP_TICKS) as u32;
        self.e2 += self.c * err as f64;
    }

    /// The DLL's filtered estimate of this packet's arrival time, to be used
    /// in place of the raw arrival tick count for timestamp synthesis.
    fn smoothed_arrival(&self) -> f64 {
        self.tail_ts as f64
    }
}

/// Wraps an ordinary receive `StreamProcessor`, substituting arrival-time
/// synthesis for SYT-driven timestamping ahead of the same
/// `write_frames`/port/transfer machinery.
pub struct OxfordReceiveProcessor {
    inner: StreamProcessor,
    arrival_dll: ArrivalDll,
    staging: Vec<u8>,
    frames_staged: usize,
    syt_interval: usize,
    nominal_rate: f64,
    dimension: usize,
}

impl OxfordReceiveProcessor {
    pub fn new(
        config: TimestampedBufferConfig,
        dimension: usize,
        syt_interval: usize,
        nominal_rate: f64,
        nominal_ticks_per_packet: f64,
    ) -> Self {
        OxfordReceiveProcessor {
            inner: StreamProcessor::new(config, dimension, SpDirection::Receive, BlockingMode::Blocking),
            arrival_dll: ArrivalDll::new(nominal_ticks_per_packet, 1.0),
            staging: Vec::new(),
            frames_staged: 0,
            syt_interval,
            nominal_rate,
            dimension,
        }
    }

    pub fn inner(&self) -> &StreamProcessor {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut StreamProcessor {
        &mut self.inner
    }

    /// Accepts one packet's raw AM824 payload, tagged with its arrival time
    /// in ticks. Emits a synthetic period to the underlying
    /// `TimestampedBuffer` only once `syt_interval` frames have
    /// accumulated.
    pub fn process_receive_packet(&mut self, payload: &[u8], arrival_ticks: u32) -> Result<(), SpError> {
        self.arrival_dll.update(arrival_ticks);
        self.staging.extend_from_slice(payload);

        let frame_bytes = self.dimension * 4;
        self.frames_staged += payload.len() / frame_bytes;

        if self.frames_staged < self.syt_interval {
            return Ok(());
        }

        let ts_val = self.arrival_dll.smoothed_arrival() - self.frames_staged as f64 * self.nominal_rate - CAUSALITY_BACKOFF_TICKS;
        let ts = Timestamp::from_f64(ts_val.rem_euclid(WRAP_TICKS), WRAP_TICKS);

        let n_frames = self.frames_staged;
        let bytes = n_frames * frame_bytes;
        let result = self.inner.buffer().write_frames(n_frames, &self.staging[..bytes], ts);
        self.staging.drain(..bytes);
        self.frames_staged = 0;

        result.map_err(|err| SpError::Xrun(err.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_oxford() -> OxfordReceiveProcessor {
        let config = TimestampedBufferConfig::new(4, 2, 64, 512.0, 8, WRAP_TICKS).unwrap();
        OxfordReceiveProcessor::new(config, 2, 8, 512.0, 400.0)
    }

    #[test]
    fn stages_until_a_full_syt_interval_then_emits() {
        let mut sp = make_oxford();
        let frame_bytes = 2 * 4;
        for _ in 0..7 {
            sp.process_receive_packet(&vec![0u8; frame_bytes], 1000).unwrap();
            assert_eq!(sp.inner().buffer().buffer_fill(), 0);
        }
        sp.process_receive_packet(&vec![0u8; frame_bytes], 1008).unwrap();
        assert_eq!(sp.inner().buffer().buffer_fill(), 8);
    }
}
