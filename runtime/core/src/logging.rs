// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2020 Takashi Sakamoto

use tracing_subscriber::EnvFilter;

use crate::LogLevel;

/// Installs a `tracing` subscriber for the process. `level` sets the default
/// filter when `RUST_LOG` is unset; `RUST_LOG` always takes precedence.
///
/// Malformed-packet counters are expected to log at `debug`/`trace`, since
/// they are non-fatal by design; xrun escalation and DLL lock loss log at
/// `warn`.
pub fn init(level: LogLevel) {
    let default_directive = match level {
        LogLevel::Debug => "debug",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
