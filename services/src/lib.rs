// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Client-facing facade over `amdtp-stream-engine`, mirroring the minimum
//! client API surface of spec.md §6. A `Handle` owns one device's
//! `StreamProcessorManager`; `SpIdx`/`PortIdx` are the opaque handles client
//! threads carry back into it.
//!
//! **Redesign from §6: no `set_port_buffer`.** The original C surface binds
//! a port to a caller-owned raw buffer pointer (`set_port_buffer(port,
//! ptr)`) that `read`/`write` (or the codec, for audio) later dereference.
//! `Port` instead owns its sample storage (`Vec<AudioSample>` / a MIDI
//! `VecDeque`, see `amdtp_stream_engine::port::Port`); `read`/`write` copy
//! into and out of it. This removes an unsafe, lifetime-unchecked raw
//! pointer from the public surface at the cost of one extra copy per period,
//! which spec.md §5's concurrency model does not forbid (the per-period
//! transfer is already off the realtime transport thread). See DESIGN.md.

use std::sync::Arc;

use amdtp_stream_engine::{
    port::Direction as PortDirection,
    processor::{BlockingMode, SpDirection, SpError, StreamProcessor},
    ManagerState, Port, StreamProcessorManager,
};
use amdtp_timestamped_buffer::TimestampedBufferConfig;
use engine_core::{EngineConfig, EngineError};
use firewire_amdtp_am824::{AudioSample, ClusterPort, PortKind as ClusterPortKind};

/// Direction of one registered stream, per §6's `add_stream`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    Capture,
    Playback,
}

impl From<Direction> for SpDirection {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Capture => SpDirection::Receive,
            Direction::Playback => SpDirection::Transmit,
        }
    }
}

/// A port's data kind, per §6's `port_type`. `Control` is named for parity
/// with the wire-level client API but is never produced by `add_port`:
/// per-vendor control surfaces are an external collaborator.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PortType {
    Audio,
    Midi,
    Control,
}

/// Kind requested at `add_port` time.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PortKind {
    AudioInt24,
    AudioFloat,
    Midi,
}

/// Opaque reference to a registered `StreamProcessor`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SpIdx {
    direction: Direction,
    index: usize,
}

/// Opaque reference to a registered `Port`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PortIdx {
    sp: SpIdx,
    index: usize,
}

/// One device's stream group: its `StreamProcessorManager` plus the
/// tunables fixed at `init` time.
pub struct Handle {
    manager: Arc<StreamProcessorManager>,
    period_size: usize,
    n_periods: usize,
    config: EngineConfig,
}

/// `init(port, period_size, n_periods) -> Handle`. `port` names the 1394
/// port the transport will later bind to; the engine core itself is
/// transport-agnostic, so it is only retained for diagnostics. Uses
/// `EngineConfig::default()`; see `init_with_config` to load one from TOML.
pub fn init(port: &str, period_size: usize, n_periods: usize) -> Result<Handle, EngineError> {
    init_with_config(port, period_size, n_periods, EngineConfig::default())
}

/// As `init`, but with an explicitly supplied `EngineConfig` (e.g. loaded
/// from a TOML file via `EngineConfig::from_toml_file`). Not part of §6's
/// minimum client surface; an additive entry point for the ambient config
/// layer.
pub fn init_with_config(port: &str, period_size: usize, n_periods: usize, config: EngineConfig) -> Result<Handle, EngineError> {
    if period_size == 0 || n_periods < 2 {
        return Err(EngineError::Configuration(format!(
            "invalid period_size={period_size} or n_periods={n_periods} for port {port}"
        )));
    }
    tracing::info!(port, period_size, n_periods, "initializing stream engine");
    Ok(Handle {
        manager: Arc::new(StreamProcessorManager::new(period_size)),
        period_size,
        n_periods,
        config,
    })
}

/// `add_stream(handle, direction, channels, sample_rate) -> SPIdx`.
pub fn add_stream(handle: &Handle, direction: Direction, channels: usize, sample_rate: f64) -> Result<SpIdx, EngineError> {
    let buffer_frames = handle.period_size * handle.n_periods;
    let config = TimestampedBufferConfig::new(4, channels, buffer_frames, sample_rate, handle.period_size, 128.0 * 24_576_000.0)
        .map_err(|err| EngineError::Configuration(err.to_string()))?;

    let mut sp = StreamProcessor::new(config, channels, direction.into(), BlockingMode::Blocking);
    sp.set_snap_rate_on_deviation(handle.config.snap_rate_on_deviation);
    let index = match direction {
        Direction::Capture => handle.manager.add_receive_sp(sp),
        Direction::Playback => handle.manager.add_transmit_sp(sp),
    };
    Ok(SpIdx { direction, index })
}

/// `add_port(sp, name, kind, position[, location]) -> PortIdx`.
pub fn add_port(handle: &Handle, sp: SpIdx, name: &str, kind: PortKind, position: usize, location: Option<u8>) -> Result<PortIdx, EngineError> {
    let port_direction = match sp.direction {
        Direction::Capture => PortDirection::Capture,
        Direction::Playback => PortDirection::Playback,
    };

    let (port, cluster_kind) = match kind {
        PortKind::AudioInt24 => (
            Port::new_audio(name, port_direction, false, position, handle.period_size),
            ClusterPortKind::AudioInt24,
        ),
        PortKind::AudioFloat => (
            Port::new_audio(name, port_direction, true, position, handle.period_size),
            ClusterPortKind::AudioFloat,
        ),
        PortKind::Midi => {
            let location = location.ok_or_else(|| EngineError::Configuration("midi port requires a location".into()))?;
            (Port::new_midi(name, port_direction, position, location), ClusterPortKind::Midi { location })
        }
    };

    let cluster_port = ClusterPort { position, kind: cluster_kind };
    let index = handle
        .manager
        .with_sp_mut(sp.direction.into(), sp.index, |processor| processor.add_port(port, cluster_port))
        .ok_or_else(|| EngineError::Configuration(format!("no such stream processor {sp:?}")))?;
    Ok(PortIdx { sp, index })
}

/// `start(handle)`. Actual cycle arrival and dry-running are driven by the
/// transport via `StreamProcessorManager::on_start_cycle_reached`/
/// `align_and_run`.
pub fn start(handle: &Handle, start_cycle: u16) {
    handle.manager.elect_sync_master();
    handle.manager.start(start_cycle);
}

/// `stop(handle)`.
pub fn stop(handle: &Handle) {
    handle.manager.stop_all();
}

/// `wait_for_period(handle) -> n | -1 on xrun`.
pub fn wait_for_period(handle: &Handle) -> i64 {
    handle.manager.wait_for_period()
}

/// `transfer(handle, direction)`. The manager transfers every `Running` SP
/// in one call regardless of direction; `direction` is accepted for parity
/// with §6, since both directions always move together each period.
pub fn transfer(handle: &Handle, _direction: Direction) -> Result<(), SpError> {
    handle.manager.transfer()
}

/// `read(port, buf, n)`: copies up to `n` int24 audio samples out of a
/// capture port.
pub fn read(handle: &Handle, port: PortIdx, buf: &mut [i32], n: usize) -> Result<usize, EngineError> {
    handle
        .manager
        .with_sp_mut(port.sp.direction.into(), port.sp.index, |processor| {
            let p = processor.port_mut(port.index)?;
            let count = n.min(buf.len()).min(p.audio_samples().len());
            for (i, sample) in p.audio_samples().iter().take(count).enumerate() {
                buf[i] = match sample {
                    AudioSample::Int24(v) => *v,
                    AudioSample::Float(v) => (*v * 0x7fffff as f32) as i32,
                };
            }
            Some(count)
        })
        .flatten()
        .ok_or_else(|| EngineError::Resource(format!("no such port {port:?}")))
}

/// `write(port, buf, n)`: copies up to `n` int24 audio samples into a
/// playback port ahead of the next `transfer`.
pub fn write(handle: &Handle, port: PortIdx, buf: &[i32], n: usize) -> Result<usize, EngineError> {
    handle
        .manager
        .with_sp_mut(port.sp.direction.into(), port.sp.index, |processor| {
            let p = processor.port_mut(port.index)?;
            let samples = p.audio_samples_mut();
            let count = n.min(buf.len()).min(samples.len());
            for (i, slot) in samples.iter_mut().take(count).enumerate() {
                *slot = AudioSample::Int24(buf[i]);
            }
            Some(count)
        })
        .flatten()
        .ok_or_else(|| EngineError::Resource(format!("no such port {port:?}")))
}

/// `port_count(handle, direction)`: total ports across every SP registered
/// for `direction`, flat-enumerable via `port_name`/`port_type` below.
pub fn port_count(handle: &Handle, direction: Direction) -> usize {
    handle.manager.total_port_count(direction.into())
}

/// `port_name(handle, direction, idx) -> string`. `idx` is a flat index over
/// every port of every SP registered for `direction`, in `add_stream`
/// registration order — paired with `port_count(handle, direction)` this
/// lets a caller enumerate ports without separately tracking an `SpIdx`.
pub fn port_name(handle: &Handle, direction: Direction, idx: usize) -> Option<String> {
    handle.manager.with_flat_port(direction.into(), idx, |p| p.name().to_string())
}

/// `port_type(handle, direction, idx) -> {audio, midi, control}`.
pub fn port_type(handle: &Handle, direction: Direction, idx: usize) -> Option<PortType> {
    handle.manager.with_flat_port(direction.into(), idx, |p| match p.port_type() {
        amdtp_stream_engine::port::PortType::AudioInt24 | amdtp_stream_engine::port::PortType::AudioFloat => PortType::Audio,
        amdtp_stream_engine::port::PortType::Midi => PortType::Midi,
    })
}

pub fn manager_state(handle: &Handle) -> ManagerState {
    handle.manager.state()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registers_a_stream_and_an_audio_port() {
        let handle = init("loopback", 8, 3).unwrap();
        let sp = add_stream(&handle, Direction::Capture, 2, 48000.0).unwrap();
        add_port(&handle, sp, "analog-1", PortKind::AudioInt24, 0, None).unwrap();
        assert_eq!(port_count(&handle, Direction::Capture), 1);
        assert_eq!(port_type(&handle, Direction::Capture, 0), Some(PortType::Audio));
        assert_eq!(port_name(&handle, Direction::Capture, 0).as_deref(), Some("analog-1"));
    }

    #[test]
    fn port_count_sums_across_every_sp_of_a_direction() {
        let handle = init("loopback", 8, 3).unwrap();
        let sp0 = add_stream(&handle, Direction::Capture, 2, 48000.0).unwrap();
        let sp1 = add_stream(&handle, Direction::Capture, 2, 48000.0).unwrap();
        add_port(&handle, sp0, "analog-1", PortKind::AudioInt24, 0, None).unwrap();
        add_port(&handle, sp1, "analog-2", PortKind::AudioInt24, 0, None).unwrap();
        add_port(&handle, sp1, "analog-3", PortKind::AudioInt24, 1, None).unwrap();

        assert_eq!(port_count(&handle, Direction::Capture), 3);
        assert_eq!(port_name(&handle, Direction::Capture, 0).as_deref(), Some("analog-1"));
        assert_eq!(port_name(&handle, Direction::Capture, 1).as_deref(), Some("analog-2"));
        assert_eq!(port_name(&handle, Direction::Capture, 2).as_deref(), Some("analog-3"));
    }

    #[test]
    fn rejects_a_zero_period_size() {
        assert!(init("loopback", 0, 3).is_err());
    }
}
