// SPDX-License-Identifier: MIT
// Copyright (c) 2024 Takashi Sakamoto

//! A single-producer/single-consumer, frame-addressable ring with an
//! embedded second-order DLL that estimates the timestamp of every frame
//! it holds from externally supplied cycle-timer readings.

mod buffer;
mod dll;
mod ring;

pub use buffer::{
    BlockProcessClient, BufferError, ConfigError, TimestampedBuffer, TimestampedBufferConfig,
    FRAMES_PER_PROCESS_BLOCK,
};
pub use dll::{BandwidthError, LOCK_LOSS_FRACTION};
pub use ring::RingError;
