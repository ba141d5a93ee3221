// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! One StreamProcessor per direction per device: owns a `TimestampedBuffer`
//! and a set of `Port`s, implements the per-packet callbacks the transport
//! expects, and marshals between packet payload, the ring, and port buffers
//! via the AM824 cluster codec.

use amdtp_timestamped_buffer::{BlockProcessClient, TimestampedBuffer, TimestampedBufferConfig};
use firewire_amdtp_am824::{decode_cluster, encode_cluster, CipHeader, ClusterPort, ClusterSink, ClusterSource, AudioSample, MidiEvent};
use ieee1394_cycle_timer::{syt_to_timestamp, to_ticks, CycleTimer, Timestamp};

use crate::port::{Direction, Port};

/// Mirrors spec.md §4.4's lifecycle: `Stopped -> WaitingToStart -> DryRunning
/// -> Running`, with any state collapsing back to `Stopped` on `stop()` or a
/// fatal error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SpState {
    Stopped,
    WaitingToStart { start_cycle: u16 },
    DryRunning,
    Running,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SpDirection {
    Receive,
    Transmit,
}

/// How many events a transmit SP emits on an otherwise-empty slot.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BlockingMode {
    /// Always send exactly one SYT-interval's worth of events.
    Blocking,
    /// Send zero events when there is nothing to send.
    BlockingEmpty,
}

#[derive(Debug, Clone)]
pub enum SpError {
    /// Ring over/underrun; the caller should escalate to the manager.
    Xrun(String),
    /// The transport itself failed; the SP has transitioned to `Stopped`.
    Transport(String),
}

impl std::fmt::Display for SpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpError::Xrun(msg) => write!(f, "xrun: {msg}"),
            SpError::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

/// Adapts a slice of `Port`s to the AM824 cluster codec and the ring's
/// `BlockProcessClient` boundary. Built fresh per call so it only ever
/// borrows `ports` for the duration of one `block_process_*` call, per the
/// "buffer never owns the client" rule.
struct PortCodecClient<'a> {
    ports: &'a mut [Port],
    cluster_ports: &'a [ClusterPort],
    dimension: usize,
}

impl<'a> ClusterSink for PortCodecClient<'a> {
    fn put_audio(&mut self, position: usize, frame: usize, sample: AudioSample) {
        if let Some(port) = self.ports.iter_mut().find(|p| p.position() == position && p.is_enabled()) {
            if frame < port.audio_samples().len() {
                port.audio_samples_mut()[frame] = sample;
            }
        }
    }

    fn put_midi(&mut self, position: usize, _frame: usize, event: MidiEvent) {
        if let Some(port) = self.ports.iter_mut().find(|p| p.position() == position && p.is_enabled()) {
            if let (MidiEvent::Bytes1(b), Some(ring)) = (event, port.midi_ring_mut()) {
                ring.push_back(b);
            }
        }
    }
}

impl<'a> ClusterSource for PortCodecClient<'a> {
    fn audio_at(&self, position: usize, frame: usize) -> AudioSample {
        self.ports
            .iter()
            .find(|p| p.position() == position && p.is_enabled())
            .and_then(|p| p.audio_samples().get(frame).copied())
            .unwrap_or(AudioSample::Int24(0))
    }

    fn midi_at(&self, position: usize, _location: u8) -> MidiEvent {
        self.ports
            .iter()
            .find(|p| p.position() == position && p.is_enabled())
            .and_then(|p| p.midi_ring())
            .and_then(|ring| ring.front().copied())
            .map(MidiEvent::Bytes1)
            .unwrap_or(MidiEvent::NoData)
    }
}

impl<'a> BlockProcessClient for PortCodecClient<'a> {
    /// Playback period-transfer: encode port samples into the ring.
    fn process_write_block(&mut self, buf: &mut [u8], _n_frames: usize, _offset: usize) -> Result<(), String> {
        let dimension = self.dimension;
        let cluster_ports = self.cluster_ports;
        encode_cluster(buf, dimension, cluster_ports, &*self);
        for port in self.ports.iter_mut() {
            if port.port_type() == crate::port::PortType::Midi {
                if let Some(ring) = port.midi_ring_mut() {
                    ring.pop_front();
                }
            }
        }
        Ok(())
    }

    /// Capture period-transfer: decode ring bytes into port buffers.
    fn process_read_block(&mut self, buf: &[u8], _n_frames: usize, _offset: usize) -> Result<(), String> {
        let dimension = self.dimension;
        let cluster_ports = self.cluster_ports.to_vec();
        decode_cluster(buf, dimension, &cluster_ports, self);
        Ok(())
    }
}

/// A trivial `BlockProcessClient` that copies ring bytes straight into (or
/// out of) a packet payload buffer, with no codec involvement: per spec.md
/// §4.4 the ring already holds wire-format AM824 bytes once a period has
/// been transferred, so per-packet marshal is a plain copy.
struct RawCopyClient<'a> {
    packet_buf: &'a mut Vec<u8>,
}

impl<'a> BlockProcessClient for RawCopyClient<'a> {
    fn process_write_block(&mut self, _buf: &mut [u8], _n_frames: usize, _offset: usize) -> Result<(), String> {
        Err("raw copy client does not originate data".into())
    }

    fn process_read_block(&mut self, buf: &[u8], _n_frames: usize, _offset: usize) -> Result<(), String> {
        self.packet_buf.extend_from_slice(buf);
        Ok(())
    }
}

pub struct StreamProcessor {
    buffer: TimestampedBuffer,
    ports: Vec<Port>,
    cluster_ports: Vec<ClusterPort>,
    dimension: usize,
    direction: SpDirection,
    blocking_mode: BlockingMode,
    is_sync_source: bool,
    state: SpState,
    dbc: u8,
}

impl StreamProcessor {
    pub fn new(config: TimestampedBufferConfig, dimension: usize, direction: SpDirection, blocking_mode: BlockingMode) -> Self {
        StreamProcessor {
            buffer: config.prepare(),
            ports: Vec::new(),
            cluster_ports: Vec::new(),
            dimension,
            direction,
            blocking_mode,
            is_sync_source: false,
            state: SpState::Stopped,
            dbc: 0,
        }
    }

    pub fn add_port(&mut self, port: Port, cluster_port: ClusterPort) -> usize {
        self.ports.push(port);
        self.cluster_ports.push(cluster_port);
        self.ports.len() - 1
    }

    pub fn port(&self, idx: usize) -> Option<&Port> {
        self.ports.get(idx)
    }

    pub fn port_mut(&mut self, idx: usize) -> Option<&mut Port> {
        self.ports.get_mut(idx)
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn buffer(&self) -> &TimestampedBuffer {
        &self.buffer
    }

    pub fn state(&self) -> SpState {
        self.state
    }

    pub fn set_sync_source(&mut self, is_sync_source: bool) {
        self.is_sync_source = is_sync_source;
    }

    /// Wires `EngineConfig::snap_rate_on_deviation` into this SP's buffer.
    pub fn set_snap_rate_on_deviation(&mut self, on: bool) {
        self.buffer.set_snap_rate_on_deviation(on);
    }

    pub fn is_sync_source(&self) -> bool {
        self.is_sync_source
    }

    pub fn direction(&self) -> SpDirection {
        self.direction
    }

    /// `Stopped -> WaitingToStart`.
    pub fn start(&mut self, start_cycle: u16) {
        self.state = SpState::WaitingToStart { start_cycle };
    }

    /// `WaitingToStart -> DryRunning`, once the transport reports the
    /// requested cycle has arrived.
    pub fn begin_dry_running(&mut self) {
        if matches!(self.state, SpState::WaitingToStart { .. }) {
            self.state = SpState::DryRunning;
        }
    }

    /// `DryRunning -> Running`, once the manager confirms every peer SP is
    /// also dry-running at the agreed cycle.
    pub fn begin_running(&mut self) {
        if self.state == SpState::DryRunning {
            self.state = SpState::Running;
        }
    }

    /// Any state `-> Stopped`.
    pub fn stop(&mut self) {
        self.state = SpState::Stopped;
        self.buffer.reset();
    }

    /// Receive path, header + data phase (spec.md §4.4). Malformed packets
    /// are dropped silently; only a ring overrun reaches the caller.
    pub fn process_receive_packet(&mut self, header: [u32; 2], payload: &[u8], now: CycleTimer) -> Result<(), SpError> {
        let cip = CipHeader::parse(header);
        if !cip.is_valid_amdtp_data_packet() {
            tracing::debug!(dbc = cip.dbc, "dropping malformed CIP header");
            return Ok(());
        }
        let n_frames = payload.len() / (self.dimension * 4);
        if n_frames == 0 {
            return Ok(());
        }
        let ticks = to_ticks(syt_to_timestamp(cip.syt, now));
        let ts = Timestamp::from_ticks(ticks);
        self.buffer
            .write_frames(n_frames, payload, ts)
            .map_err(|err| SpError::Xrun(err.to_string()))
    }

    /// Transmit path, per packet (spec.md §4.4): fills a CIP header and
    /// packet payload by copying whatever the last period-transfer encoded
    /// into the ring.
    pub fn process_transmit_packet(&mut self, source_id: u8, syt_interval: u32, now: CycleTimer) -> Result<([u32; 2], Vec<u8>), SpError> {
        let n_frames = match self.blocking_mode {
            BlockingMode::Blocking => syt_interval as usize,
            BlockingMode::BlockingEmpty => {
                if self.buffer.buffer_fill() >= syt_interval as usize {
                    syt_interval as usize
                } else {
                    0
                }
            }
        };

        let mut payload = Vec::with_capacity(n_frames * self.dimension * 4);
        if n_frames > 0 {
            let mut client = RawCopyClient { packet_buf: &mut payload };
            self.buffer
                .block_process_read(n_frames, &mut client)
                .map_err(|err| SpError::Xrun(err.to_string()))?;
        }

        let (ts, _) = self.buffer.buffer_head_timestamp();
        let ct = CycleTimer::from(to_ticks_wrapping(ts.ticks()));
        let syt = if n_frames == 0 {
            firewire_amdtp_am824::cip::SYT_NO_INFO
        } else {
            (((ct.cycles & 0xf) as u16) << 12) | (ct.offset & 0x0fff)
        };

        let header = CipHeader {
            sid: source_id,
            dbs: self.dimension as u8,
            fn_val: 0,
            qpc: 0,
            sph: false,
            dbc: self.dbc,
            fmt: firewire_amdtp_am824::cip::FMT_AMDTP,
            fdf: 0,
            syt,
        }
        .build();
        self.dbc = self.dbc.wrapping_add(n_frames as u8);
        let _ = now;
        Ok((header, payload))
    }

    /// Moves one period's worth of frames between the ring and port
    /// buffers via the AM824 cluster codec (spec.md §4.5's `transfer`).
    pub fn transfer_period(&mut self, period_size: usize) -> Result<(), SpError> {
        let mut client = PortCodecClient {
            ports: &mut self.ports,
            cluster_ports: &self.cluster_ports,
            dimension: self.dimension,
        };
        match self.direction {
            SpDirection::Receive => self
                .buffer
                .block_process_read(period_size, &mut client)
                .map_err(|err| SpError::Xrun(err.to_string())),
            SpDirection::Transmit => {
                let ts = self.buffer.timestamp_from_tail(-(period_size as f64));
                self.buffer
                    .block_process_write(period_size, ts, &mut client)
                    .map_err(|err| SpError::Xrun(err.to_string()))
            }
        }
    }
}

fn to_ticks_wrapping(ticks: u32) -> u32 {
    ieee1394_cycle_timer::from_ticks(ticks)
}

#[cfg(test)]
mod test {
    use super::*;
    use firewire_amdtp_am824::PortKind;

    fn make_sp(direction: SpDirection) -> StreamProcessor {
        let config = TimestampedBufferConfig::new(4, 2, 64, 512.0, 8, 128.0 * 24_576_000.0).unwrap();
        StreamProcessor::new(config, 2, direction, BlockingMode::Blocking)
    }

    #[test]
    fn lifecycle_progresses_in_order() {
        let mut sp = make_sp(SpDirection::Receive);
        assert_eq!(sp.state(), SpState::Stopped);
        sp.start(10);
        assert_eq!(sp.state(), SpState::WaitingToStart { start_cycle: 10 });
        sp.begin_dry_running();
        assert_eq!(sp.state(), SpState::DryRunning);
        sp.begin_running();
        assert_eq!(sp.state(), SpState::Running);
        sp.stop();
        assert_eq!(sp.state(), SpState::Stopped);
    }

    #[test]
    fn malformed_header_is_dropped_without_error() {
        let mut sp = make_sp(SpDirection::Receive);
        let header = CipHeader::default().build(); // fmt=0, syt=0 -> invalid
        let now = CycleTimer::new(0, 0, 0);
        assert!(sp.process_receive_packet(header, &[0u8; 64], now).is_ok());
        assert_eq!(sp.buffer().buffer_fill(), 0);
    }

    #[test]
    fn receive_then_transfer_decodes_into_port() {
        let mut sp = make_sp(SpDirection::Receive);
        sp.add_port(
            crate::port::Port::new_audio("ch0", Direction::Capture, false, 0, 8),
            ClusterPort { position: 0, kind: PortKind::AudioInt24 },
        );
        sp.add_port(
            crate::port::Port::new_audio("ch1", Direction::Capture, false, 1, 8),
            ClusterPort { position: 1, kind: PortKind::AudioInt24 },
        );

        let header = CipHeader {
            sid: 0,
            dbs: 2,
            fn_val: 0,
            qpc: 0,
            sph: false,
            dbc: 0,
            fmt: firewire_amdtp_am824::cip::FMT_AMDTP,
            fdf: 0,
            syt: 0x0032,
        }
        .build();
        let now = CycleTimer::new(0, 0, 0);
        let mut payload = vec![0u8; 8 * 2 * 4];
        for frame in 0..8usize {
            payload[(frame * 2) * 4..(frame * 2) * 4 + 4].copy_from_slice(&(0x4000_0000u32 | frame as u32).to_be_bytes());
            payload[(frame * 2 + 1) * 4..(frame * 2 + 1) * 4 + 4].copy_from_slice(&(0x4000_0000u32 | (frame as u32 + 100)).to_be_bytes());
        }
        sp.process_receive_packet(header, &payload, now).unwrap();
        assert_eq!(sp.buffer().buffer_fill(), 8);

        sp.transfer_period(8).unwrap();
        match sp.port(0).unwrap().audio_samples()[3] {
            AudioSample::Int24(v) => assert_eq!(v, 3),
            _ => panic!("expected int24"),
        }
        match sp.port(1).unwrap().audio_samples()[3] {
            AudioSample::Int24(v) => assert_eq!(v, 103),
            _ => panic!("expected int24"),
        }
    }

    #[test]
    fn disabled_port_is_not_written_by_transfer() {
        let mut sp = make_sp(SpDirection::Receive);
        sp.add_port(
            crate::port::Port::new_audio("ch0", Direction::Capture, false, 0, 8),
            ClusterPort { position: 0, kind: PortKind::AudioInt24 },
        );
        sp.add_port(
            crate::port::Port::new_audio("ch1", Direction::Capture, false, 1, 8),
            ClusterPort { position: 1, kind: PortKind::AudioInt24 },
        );
        sp.port_mut(0).unwrap().set_enabled(false);

        let header = CipHeader {
            sid: 0,
            dbs: 2,
            fn_val: 0,
            qpc: 0,
            sph: false,
            dbc: 0,
            fmt: firewire_amdtp_am824::cip::FMT_AMDTP,
            fdf: 0,
            syt: 0x0032,
        }
        .build();
        let now = CycleTimer::new(0, 0, 0);
        let mut payload = vec![0u8; 8 * 2 * 4];
        for frame in 0..8usize {
            payload[(frame * 2) * 4..(frame * 2) * 4 + 4].copy_from_slice(&(0x4000_0000u32 | (frame as u32 + 1)).to_be_bytes());
            payload[(frame * 2 + 1) * 4..(frame * 2 + 1) * 4 + 4].copy_from_slice(&(0x4000_0000u32 | (frame as u32 + 100)).to_be_bytes());
        }
        sp.process_receive_packet(header, &payload, now).unwrap();
        sp.transfer_period(8).unwrap();

        match sp.port(0).unwrap().audio_samples()[3] {
            AudioSample::Int24(v) => assert_eq!(v, 0, "disabled port must not receive decoded samples"),
            _ => panic!("expected int24"),
        }
        match sp.port(1).unwrap().audio_samples()[3] {
            AudioSample::Int24(v) => assert_eq!(v, 103, "enabled port must still be written normally"),
            _ => panic!("expected int24"),
        }
    }
}
