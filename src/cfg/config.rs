// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Event loop / readiness notifier knobs.
    pub event_loop: EventLoopConfig,
    /// Per-connection buffered I/O settings.
    pub io: IoConfig,
    /// Listening socket settings for servers built on the runtime.
    pub listener: ListenerConfig,
    /// Deadlines the runtime applies on its own.
    pub timeouts: TimeoutConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Knobs of the dispatcher's poll loop.
pub struct EventLoopConfig {
    /// Readiness events accepted from the notifier per poll call.
    pub max_events: usize,
    /// Upper bound on one poll wait, so the loop re-checks its
    /// shutdown flag even with far-away (or no) deadlines.
    pub max_wait_us: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Buffered I/O settings shared by every fiber connection.
pub struct IoConfig {
    /// Capacity of the reader's receive buffer; also the largest value
    /// `read_raw`/`read_value` can ask for in one piece.
    pub read_buffer_bytes: usize,
    /// Flush coalesced bytes when `send()` returns while corked.
    pub cork_auto_flush: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ListenerConfig {
    /// Address the demo server binds; port 0 picks an ephemeral port.
    pub bind_address: String,
    /// Stop accepting after this many connections (server drains and
    /// the event loop ends); absent means serve forever.
    #[serde(default)]
    pub accept_limit: Option<u32>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimeoutConfig {
    /// Idle deadline applied to every accepted connection; zero or
    /// negative disables it.
    pub idle_connection_us: i64,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates invariants the runtime relies on.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.event_loop.max_events >= 1, "max_events must be >= 1");
        ensure!(self.event_loop.max_wait_us >= 1, "max_wait_us must be >= 1");
        ensure!(
            self.io.read_buffer_bytes >= 64,
            "read_buffer_bytes must be at least 64"
        );
        ensure!(
            !self.listener.bind_address.is_empty(),
            "bind_address must not be empty"
        );
        Ok(())
    }
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            max_events: 256,
            max_wait_us: 1_000_000,
        }
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            read_buffer_bytes: 64 * 1024,
            cork_auto_flush: false,
        }
    }
}
