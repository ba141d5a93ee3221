// SPDX-License-Identifier: MIT
// Copyright (c) 2024 Takashi Sakamoto

//! Cluster-level codec: packs and unpacks a whole AM824 frame across several
//! ports, including the 8-frame MIDI time-division multiplex.
//!
//! Every block handed to [`decode_cluster`]/[`encode_cluster`] is assumed to
//! be exactly one 8-frame-aligned MIDI TDM group (see
//! `amdtp_timestamped_buffer::FRAMES_PER_PROCESS_BLOCK`), so a MIDI port's
//! `location` maps directly onto the frame index within the block.

use crate::codec::{decode_audio_event, decode_midi_event, encode_audio_event, encode_audio_event_float, encode_midi_event, AudioSample, MidiEvent};

/// Frames per MIDI time-division-multiplex group.
pub const FRAMES_PER_GROUP: usize = 8;

/// A port's position (channel slot) within the cluster and its data kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterPort {
    /// 0-based quadlet offset within each frame.
    pub position: usize,
    pub kind: PortKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PortKind {
    AudioInt24,
    AudioFloat,
    /// `location` is this port's frame index (0..8) within the MIDI TDM group.
    Midi { location: u8 },
}

/// Receives decoded events during [`decode_cluster`].
pub trait ClusterSink {
    fn put_audio(&mut self, position: usize, frame: usize, sample: AudioSample);
    fn put_midi(&mut self, position: usize, frame: usize, event: MidiEvent);
}

/// Supplies events to encode during [`encode_cluster`].
pub trait ClusterSource {
    fn audio_at(&self, position: usize, frame: usize) -> AudioSample;
    /// Called only for the frame matching the port's own `location`.
    fn midi_at(&self, position: usize, location: u8) -> MidiEvent;
}

fn quadlet_at(buf: &[u8], dimension: usize, frame: usize, position: usize) -> u32 {
    let off = (frame * dimension + position) * 4;
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn put_quadlet_at(buf: &mut [u8], dimension: usize, frame: usize, position: usize, quadlet: u32) {
    let off = (frame * dimension + position) * 4;
    buf[off..off + 4].copy_from_slice(&quadlet.to_be_bytes());
}

/// Decodes `buf` (`dimension` quadlets per frame) into `sink`, for each port
/// in `ports`.
pub fn decode_cluster(buf: &[u8], dimension: usize, ports: &[ClusterPort], sink: &mut dyn ClusterSink) {
    let n_frames = buf.len() / (dimension * 4);
    for port in ports {
        match port.kind {
            PortKind::AudioInt24 | PortKind::AudioFloat => {
                let as_float = matches!(port.kind, PortKind::AudioFloat);
                for frame in 0..n_frames {
                    let quadlet = quadlet_at(buf, dimension, frame, port.position);
                    sink.put_audio(port.position, frame, decode_audio_event(quadlet, as_float));
                }
            }
            PortKind::Midi { location } => {
                let frame = location as usize;
                if frame < n_frames {
                    let quadlet = quadlet_at(buf, dimension, frame, port.position);
                    let event = decode_midi_event(quadlet);
                    if event.is_present() {
                        sink.put_midi(port.position, frame, event);
                    }
                }
            }
        }
    }
}

/// Encodes events from `source` into `buf` (`dimension` quadlets per frame,
/// pre-sized by the caller), for each port in `ports`. Frames in a MIDI
/// port's column that don't match its `location` are filled with
/// `LABEL_MIDI_NO_DATA`.
pub fn encode_cluster(buf: &mut [u8], dimension: usize, ports: &[ClusterPort], source: &dyn ClusterSource) {
    let n_frames = buf.len() / (dimension * 4);
    for port in ports {
        match port.kind {
            PortKind::AudioInt24 | PortKind::AudioFloat => {
                for frame in 0..n_frames {
                    let quadlet = match source.audio_at(port.position, frame) {
                        AudioSample::Int24(sample) => encode_audio_event(sample),
                        AudioSample::Float(sample) => encode_audio_event_float(sample),
                    };
                    put_quadlet_at(buf, dimension, frame, port.position, quadlet);
                }
            }
            PortKind::Midi { location } => {
                for frame in 0..n_frames {
                    let event = if frame == location as usize {
                        source.midi_at(port.position, location)
                    } else {
                        MidiEvent::NoData
                    };
                    put_quadlet_at(buf, dimension, frame, port.position, encode_midi_event(&event));
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct FixedSource {
        audio: [(usize, usize, AudioSample); 2],
        midi: MidiEvent,
    }

    impl ClusterSource for FixedSource {
        fn audio_at(&self, position: usize, frame: usize) -> AudioSample {
            self.audio
                .iter()
                .find(|(p, f, _)| *p == position && *f == frame)
                .map(|(_, _, s)| *s)
                .unwrap_or(AudioSample::Int24(0))
        }

        fn midi_at(&self, _position: usize, _location: u8) -> MidiEvent {
            self.midi
        }
    }

    #[derive(Default)]
    struct CapturingSink {
        audio: Vec<(usize, usize, AudioSample)>,
        midi: Vec<(usize, usize, MidiEvent)>,
    }

    impl ClusterSink for CapturingSink {
        fn put_audio(&mut self, position: usize, frame: usize, sample: AudioSample) {
            self.audio.push((position, frame, sample));
        }

        fn put_midi(&mut self, position: usize, frame: usize, event: MidiEvent) {
            self.midi.push((position, frame, event));
        }
    }

    // S4: two audio ports, one frame, round trip.
    #[test]
    fn s4_audio_cluster_round_trip() {
        let dimension = 2;
        let ports = [
            ClusterPort { position: 0, kind: PortKind::AudioInt24 },
            ClusterPort { position: 1, kind: PortKind::AudioInt24 },
        ];
        let source = FixedSource {
            audio: [
                (0, 0, AudioSample::Int24(0x0012_3456)),
                (1, 0, AudioSample::Int24(0x00fe_dcba_u32 as i32)),
            ],
            midi: MidiEvent::NoData,
        };
        let mut buf = vec![0u8; dimension * 4];
        encode_cluster(&mut buf, dimension, &ports, &source);

        let mut sink = CapturingSink::default();
        decode_cluster(&buf, dimension, &ports, &mut sink);
        assert_eq!(sink.audio[0], (0, 0, AudioSample::Int24(0x0012_3456)));
        assert_eq!(sink.audio[1], (1, 0, AudioSample::Int24(0x00fe_dcba_u32 as i32)));
    }

    // S5: MIDI byte 0x90 at port (position=1, location=3); all other slots NO_DATA.
    #[test]
    fn s5_midi_mux_demux() {
        let dimension = 2;
        let ports = [
            ClusterPort { position: 0, kind: PortKind::AudioInt24 },
            ClusterPort { position: 1, kind: PortKind::Midi { location: 3 } },
        ];
        let source = FixedSource {
            audio: [(0, 0, AudioSample::Int24(0)); 2],
            midi: MidiEvent::Bytes1(0x90),
        };
        let mut buf = vec![0u8; 8 * dimension * 4];
        encode_cluster(&mut buf, dimension, &ports, &source);

        let mut sink = CapturingSink::default();
        decode_cluster(&buf, dimension, &ports, &mut sink);

        assert_eq!(sink.midi, vec![(1, 3, MidiEvent::Bytes1(0x90))]);
        for frame in 0..8 {
            if frame != 3 {
                let quadlet = quadlet_at(&buf, dimension, frame, 1);
                assert_eq!(quadlet >> 24, crate::codec::LABEL_MIDI_NO_DATA as u32);
            }
        }
    }
}
