// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

//! The AMDTP streaming engine: per-direction `StreamProcessor`s, the typed
//! `Port` endpoints they expose to a client, the `StreamProcessorManager`
//! that synchronizes a device's SPs, and the `Transport` boundary to the
//! underlying 1394 link.

pub mod manager;
pub mod oxford;
pub mod port;
pub mod processor;
pub mod transport;

pub use manager::{ManagerState, StreamProcessorManager};
pub use oxford::OxfordReceiveProcessor;
pub use port::{Direction, Port, PortType};
pub use processor::{BlockingMode, SpDirection, SpError, SpState, StreamProcessor};
pub use transport::{ReceivedPacket, Transport};
