// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2020 Takashi Sakamoto

use std::fmt;

/// The error type shared by every runtime in the streaming engine.
///
/// Local recovery (ring under/overrun, malformed packets) is reported at the
/// stream-processor level and does not reach this type; `EngineError` carries
/// the escalations and failures a client-facing runtime has to surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Invalid sizes, rate, or update period at prepare time. No resources
    /// were allocated.
    Configuration(String),
    /// A named external resource (transport, config file, device node)
    /// could not be acquired.
    Resource(String),
    /// `set_bandwidth` was called with `ω ≥ 0.5`. Previous bandwidth is
    /// retained.
    Bandwidth(String),
    /// A ring over/underrun escalated past the stream processor.
    Xrun(String),
    /// The sync-master stream processor reported repeated xruns, or the
    /// manager timed out waiting on it; the session is being torn down.
    SyncMasterLoss(String),
    /// A transport-level error; the owning stream processor has transitioned
    /// to `Stopped`.
    Transport(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Configuration(msg) => write!(f, "configuration error: {}", msg),
            EngineError::Resource(msg) => write!(f, "resource error: {}", msg),
            EngineError::Bandwidth(msg) => write!(f, "bandwidth error: {}", msg),
            EngineError::Xrun(msg) => write!(f, "xrun: {}", msg),
            EngineError::SyncMasterLoss(msg) => write!(f, "sync master lost: {}", msg),
            EngineError::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}
