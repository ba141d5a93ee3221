// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! Exercises the streaming engine end to end against an in-process loopback
//! `Transport`, with no 1394 hardware involved: a transmit `StreamProcessor`
//! assembles packets, the loopback hands them straight back, and a receive
//! `StreamProcessor` decodes them into ports.

use amdtp_stream_engine::{
    port::{Direction, Port},
    processor::{BlockingMode, SpDirection, StreamProcessor},
    transport::{ReceivedPacket, Transport},
};
use amdtp_timestamped_buffer::TimestampedBufferConfig;
use firewire_amdtp_am824::{AudioSample, ClusterPort, PortKind};
use ieee1394_cycle_timer::CycleTimer;
use std::collections::VecDeque;

const DIMENSION: usize = 2;
const SYT_INTERVAL: u32 = 8;
const PERIOD_SIZE: usize = 8;
const NOMINAL_RATE: f64 = 512.0;
const WRAP_AT: f64 = 128.0 * 24_576_000.0;

struct LoopbackTransport {
    queued: VecDeque<ReceivedPacket>,
    ticks: u32,
}

impl LoopbackTransport {
    fn new() -> Self {
        LoopbackTransport { queued: VecDeque::new(), ticks: 0 }
    }
}

impl Transport for LoopbackTransport {
    fn current_cycle_timer(&self) -> CycleTimer {
        CycleTimer::from(ieee1394_cycle_timer::from_ticks(self.ticks))
    }

    fn poll_receive(&mut self, _stream_idx: usize) -> Option<ReceivedPacket> {
        self.queued.pop_front()
    }

    fn send(&mut self, _stream_idx: usize, header: [u32; 2], payload: &[u8]) -> Result<(), String> {
        self.ticks = ieee1394_cycle_timer::add_ticks(self.ticks, SYT_INTERVAL as i64 * 6);
        self.queued.push_back(ReceivedPacket { header, payload: payload.to_vec() });
        Ok(())
    }
}

fn build_sp(direction: SpDirection) -> StreamProcessor {
    let config = TimestampedBufferConfig::new(4, DIMENSION, PERIOD_SIZE * 4, NOMINAL_RATE, PERIOD_SIZE, WRAP_AT).expect("valid buffer config");
    let mut sp = StreamProcessor::new(config, DIMENSION, direction, BlockingMode::Blocking);
    let port_direction = match direction {
        SpDirection::Receive => Direction::Capture,
        SpDirection::Transmit => Direction::Playback,
    };
    for position in 0..DIMENSION {
        sp.add_port(
            Port::new_audio(format!("analog-{}", position + 1), port_direction, false, position, PERIOD_SIZE),
            ClusterPort { position, kind: PortKind::AudioInt24 },
        );
    }
    sp
}

fn main() {
    engine_core::logging::init(engine_core::LogLevel::Debug);

    let mut tx = build_sp(SpDirection::Transmit);
    let mut rx = build_sp(SpDirection::Receive);
    let mut transport = LoopbackTransport::new();

    tx.start(0);
    rx.start(0);
    tx.begin_dry_running();
    rx.begin_dry_running();
    tx.begin_running();
    rx.begin_running();

    for position in 0..DIMENSION {
        if let Some(port) = tx.port_mut(position) {
            for (i, sample) in port.audio_samples_mut().iter_mut().enumerate() {
                *sample = AudioSample::Int24((position * 1000 + i) as i32);
            }
        }
    }
    tx.transfer_period(PERIOD_SIZE).expect("initial playback transfer");

    for _ in 0..4 {
        let now = transport.current_cycle_timer();
        let (header, payload) = tx.process_transmit_packet(0x3f, SYT_INTERVAL, now).expect("assemble packet");
        transport.send(0, header, &payload).expect("loopback send");

        while let Some(packet) = transport.poll_receive(0) {
            let now = transport.current_cycle_timer();
            rx.process_receive_packet(packet.header, &packet.payload, now).expect("consume packet");
        }

        if rx.buffer().buffer_fill() >= PERIOD_SIZE {
            rx.transfer_period(PERIOD_SIZE).expect("capture transfer");
            let sample = match rx.port(0).unwrap().audio_samples()[0] {
                AudioSample::Int24(v) => v,
                AudioSample::Float(v) => v as i32,
            };
            tracing::info!(sample, "decoded loopback frame 0 of channel 0");
        }
    }
}
