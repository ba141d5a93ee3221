// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! A typed client-facing endpoint: audio (int24 or float) or MIDI, pinned to
//! a slot in the AM824 cluster.

use firewire_amdtp_am824::AudioSample;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    Capture,
    Playback,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PortType {
    AudioInt24,
    AudioFloat,
    Midi,
}

enum PortStorage {
    Audio(Vec<AudioSample>),
    Midi(VecDeque<u8>),
}

/// A single port: a named, typed endpoint with a fixed slot in the AM824
/// cluster. Audio ports carry one period's worth of samples; MIDI ports
/// carry an internal byte ring, per spec.
pub struct Port {
    name: String,
    direction: Direction,
    port_type: PortType,
    position: usize,
    /// MIDI sub-slot (0..8) within the 8-frame TDM group. `None` for audio.
    location: Option<u8>,
    enabled: bool,
    storage: PortStorage,
}

impl Port {
    pub fn new_audio(name: impl Into<String>, direction: Direction, as_float: bool, position: usize, period_size: usize) -> Self {
        Port {
            name: name.into(),
            direction,
            port_type: if as_float { PortType::AudioFloat } else { PortType::AudioInt24 },
            position,
            location: None,
            enabled: true,
            storage: PortStorage::Audio(vec![AudioSample::Int24(0); period_size]),
        }
    }

    pub fn new_midi(name: impl Into<String>, direction: Direction, position: usize, location: u8) -> Self {
        Port {
            name: name.into(),
            direction,
            port_type: PortType::Midi,
            position,
            location: Some(location),
            enabled: true,
            storage: PortStorage::Midi(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn location(&self) -> Option<u8> {
        self.location
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn audio_samples(&self) -> &[AudioSample] {
        match &self.storage {
            PortStorage::Audio(buf) => buf,
            PortStorage::Midi(_) => &[],
        }
    }

    pub fn audio_samples_mut(&mut self) -> &mut [AudioSample] {
        match &mut self.storage {
            PortStorage::Audio(buf) => buf,
            PortStorage::Midi(_) => &mut [],
        }
    }

    pub fn midi_ring_mut(&mut self) -> Option<&mut VecDeque<u8>> {
        match &mut self.storage {
            PortStorage::Midi(ring) => Some(ring),
            PortStorage::Audio(_) => None,
        }
    }

    pub fn midi_ring(&self) -> Option<&VecDeque<u8>> {
        match &self.storage {
            PortStorage::Midi(ring) => Some(ring),
            PortStorage::Audio(_) => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn audio_port_has_period_size_samples() {
        let port = Port::new_audio("analog-1", Direction::Capture, false, 0, 16);
        assert_eq!(port.audio_samples().len(), 16);
    }

    #[test]
    fn midi_port_carries_location() {
        let port = Port::new_midi("midi-1", Direction::Playback, 1, 3);
        assert_eq!(port.location(), Some(3));
        assert_eq!(port.port_type(), PortType::Midi);
    }

    #[test]
    fn disabling_a_port_is_observable() {
        let mut port = Port::new_audio("analog-1", Direction::Capture, false, 0, 8);
        assert!(port.is_enabled());
        port.set_enabled(false);
        assert!(!port.is_enabled());
    }
}
