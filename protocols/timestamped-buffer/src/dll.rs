// SPDX-License-Identifier: MIT
// Copyright (c) 2024 Takashi Sakamoto

//! Second-order delay-locked loop tracking a sample rate (in ticks/frame)
//! from a sequence of externally supplied cycle-timer timestamps.

use std::f64::consts::PI;

/// `diff_ticks`/`add_ticks` for the `f64` tick domain the DLL operates in.
///
/// The DLL works directly in tick units (as returned by the cycle-timer
/// crate widened to `f64`) rather than in seconds, so it carries its own
/// small wrap-aware helpers instead of depending on the 32-bit register
/// arithmetic in `ieee1394-cycle-timer`.
pub fn wrap(ts: f64, wrap_at: f64) -> f64 {
    let mut ts = ts;
    while ts >= wrap_at {
        ts -= wrap_at;
    }
    while ts < 0.0 {
        ts += wrap_at;
    }
    ts
}

fn diff_ticks(a: f64, b: f64, wrap_at: f64) -> f64 {
    let mut diff = a - b;
    if diff > wrap_at / 2.0 {
        diff -= wrap_at;
    } else if diff < -wrap_at / 2.0 {
        diff += wrap_at;
    }
    diff
}

/// Divergence beyond which a persistent loss of lock is suspected.
pub const LOCK_LOSS_FRACTION: f64 = 0.10;

#[derive(Debug)]
pub struct BandwidthError {
    pub bandwidth_hz: f64,
    pub omega: f64,
}

impl std::fmt::Display for BandwidthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "bandwidth {} Hz yields omega {} >= 0.5, rejected",
            self.bandwidth_hz, self.omega
        )
    }
}

impl std::error::Error for BandwidthError {}

/// The DLL's tracked state: the predicted timestamp of the tail frame, the
/// frequency-error integrator, and the derived instantaneous rate.
pub struct Dll {
    nominal_rate: f64,
    update_period: u32,
    wrap_at: f64,
    bandwidth_hz: f64,
    b: f64,
    c: f64,
    e2: f64,
    tail_ts: f64,
    next_tail_ts: f64,
    rate: f64,
}

impl Dll {
    pub fn new(nominal_rate: f64, update_period: u32, wrap_at: f64) -> Self {
        let mut dll = Dll {
            nominal_rate,
            update_period,
            wrap_at,
            bandwidth_hz: 0.0,
            b: 0.0,
            c: 0.0,
            e2: nominal_rate * update_period as f64,
            tail_ts: 0.0,
            next_tail_ts: nominal_rate * update_period as f64,
            rate: nominal_rate,
        };
        dll.set_bandwidth(1.0)
            .expect("default 1 Hz bandwidth is always accepted");
        dll
    }

    /// `tupdate = nominal_rate * update_period`, `omega = bandwidth_hz * tupdate`,
    /// `b = sqrt(2) * 2*pi*omega`, `c = (2*pi*omega)^2`.
    pub fn set_bandwidth(&mut self, bandwidth_hz: f64) -> Result<(), BandwidthError> {
        let tupdate = self.nominal_rate * self.update_period as f64;
        let omega = bandwidth_hz * tupdate;
        if omega >= 0.5 {
            return Err(BandwidthError { bandwidth_hz, omega });
        }
        let big_omega = 2.0 * PI * omega;
        self.b = 2.0_f64.sqrt() * big_omega;
        self.c = big_omega * big_omega;
        self.bandwidth_hz = bandwidth_hz;
        Ok(())
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth_hz
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn tail_ts(&self) -> f64 {
        self.tail_ts
    }

    pub fn next_tail_ts(&self) -> f64 {
        self.next_tail_ts
    }

    /// Snaps the tail to `ts` and resets the integrator to track at the
    /// current rate estimate, per `set_tail_timestamp`.
    pub fn seed_tail(&mut self, ts: f64) {
        self.tail_ts = wrap(ts, self.wrap_at);
        self.e2 = self.update_period as f64 * self.rate;
        self.next_tail_ts = wrap(self.tail_ts + self.e2, self.wrap_at);
    }

    /// Snaps the tail so that the head (`framecounter` frames earlier)
    /// becomes `ts`, per `set_head_timestamp`.
    pub fn seed_head(&mut self, ts: f64, framecounter: u32) {
        let tail = wrap(ts + self.rate * framecounter as f64, self.wrap_at);
        self.tail_ts = tail;
        self.e2 = self.update_period as f64 * self.rate;
        self.next_tail_ts = wrap(self.tail_ts + self.e2, self.wrap_at);
    }

    /// Runs one DLL update step for a batch of exactly `update_period`
    /// frames newly appended with timestamp `ts_new`. Returns the signed
    /// error fed to the loop, for diagnostics.
    pub fn update(&mut self, ts_new: f64) -> f64 {
        let err = diff_ticks(ts_new, self.next_tail_ts, self.wrap_at);
        self.tail_ts = self.next_tail_ts;
        self.next_tail_ts = wrap(self.next_tail_ts + self.b * err + self.e2, self.wrap_at);
        self.e2 += self.c * err;
        self.rate = diff_ticks(self.next_tail_ts, self.tail_ts, self.wrap_at)
            / self.update_period as f64;
        if self.is_diverged() {
            tracing::warn!(
                rate = self.rate,
                nominal_rate = self.nominal_rate,
                "dll rate diverged from nominal, possible loss of lock"
            );
        }
        err
    }

    /// Advances the tail by linear extrapolation at the current rate,
    /// without perturbing the loop filter. Used for batches whose size is
    /// not exactly one update period, where the predictor-corrector step
    /// is not defined.
    pub fn advance_tail_without_update(&mut self, ts_new: f64) {
        self.tail_ts = wrap(ts_new, self.wrap_at);
        self.next_tail_ts = wrap(self.tail_ts + self.rate * self.update_period as f64, self.wrap_at);
    }

    /// Shifts both the tail timestamp and its prediction forward by
    /// `delta` ticks, preserving the relationship between them. Used by
    /// `preload_frames` to keep the head timestamp stable across an
    /// insertion that grows `framecounter`.
    pub fn shift_tail(&mut self, delta: f64) {
        self.tail_ts = wrap(self.tail_ts + delta, self.wrap_at);
        self.next_tail_ts = wrap(self.next_tail_ts + delta, self.wrap_at);
    }

    /// Forces the rate back to nominal, the recovery action the spec
    /// allows (but does not require) on persistent lock loss.
    pub fn snap_rate_to_nominal(&mut self) {
        self.rate = self.nominal_rate;
    }

    /// Whether the current rate has diverged from nominal by more than
    /// [`LOCK_LOSS_FRACTION`], the same condition `update` logs against.
    pub fn is_diverged(&self) -> bool {
        (self.rate - self.nominal_rate).abs() > self.nominal_rate * LOCK_LOSS_FRACTION
    }

    /// `(tail_ts - k * rate) mod wrap_at`; `k` may exceed the current frame
    /// count for extrapolation beyond the buffer.
    pub fn timestamp_from_tail(&self, k: f64) -> f64 {
        wrap(self.tail_ts - k * self.rate, self.wrap_at)
    }

    pub fn update_period(&self) -> u32 {
        self.update_period
    }
}
