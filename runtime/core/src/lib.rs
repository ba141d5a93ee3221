// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2020 Takashi Sakamoto

//! Ambient stack shared by every runtime in the streaming engine: the
//! `EngineError` type, TOML-loadable `EngineConfig`, `tracing` subscriber
//! initialization, a `std::thread`-based periodic-task `Dispatcher`, and a
//! small `clap`-driven command-line harness.

pub mod cmdline;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;

pub use config::{ConfigLoadError, EngineConfig};
pub use error::EngineError;

use clap::ValueEnum;

/// The level to log runtime diagnostics at by default.
#[derive(ValueEnum, Debug, Copy, Clone, Eq, PartialEq)]
pub enum LogLevel {
    Debug,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Debug
    }
}

pub trait RuntimeOperation<T>: Sized {
    fn new(arg: T, log_level: Option<LogLevel>) -> Result<Self, EngineError>;
    fn listen(&mut self) -> Result<(), EngineError>;
    fn run(&mut self) -> Result<(), EngineError>;
}
