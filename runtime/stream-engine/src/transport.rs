// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! The boundary to the underlying 1394 transport, an external collaborator
//! per spec.md §1: assumed to deliver isochronous packets tagged with a
//! per-packet cycle timestamp and to accept transmit callbacks.

use ieee1394_cycle_timer::CycleTimer;

/// One received packet: its two CIP header quadlets and payload.
pub struct ReceivedPacket {
    pub header: [u32; 2],
    pub payload: Vec<u8>,
}

/// Polled by a `Dispatcher` worker thread, once per transport iteration.
/// Implementations wrap whatever the real 1394 link layer (or, in tests, an
/// in-process loopback) exposes.
pub trait Transport: Send {
    /// The transport's current cycle timer reading.
    fn current_cycle_timer(&self) -> CycleTimer;

    /// Non-blocking poll for the next packet of a given receive stream.
    fn poll_receive(&mut self, stream_idx: usize) -> Option<ReceivedPacket>;

    /// Hands a filled packet to the transport for transmission on a given
    /// transmit stream.
    fn send(&mut self, stream_idx: usize, header: [u32; 2], payload: &[u8]) -> Result<(), String>;
}
