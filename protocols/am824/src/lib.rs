// SPDX-License-Identifier: MIT
// Copyright (c) 2024 Takashi Sakamoto

#![doc = include_str!("../README.md")]

pub mod cip;
pub mod cluster;
pub mod codec;

pub use cip::CipHeader;
pub use cluster::{decode_cluster, encode_cluster, ClusterPort, ClusterSink, ClusterSource, PortKind, FRAMES_PER_GROUP};
pub use codec::{AudioSample, MidiEvent};

/// SYT interval (frames per timestamp update) for a given nominal sample
/// rate family, per spec.md glossary.
pub fn syt_interval_for_rate(sample_rate: u32) -> u32 {
    match sample_rate {
        32000 | 44100 | 48000 => 8,
        88200 | 96000 => 16,
        176400 | 192000 => 32,
        _ => 8,
    }
}
