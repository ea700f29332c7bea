// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Demo: a length-prefixed echo server on the fiber runtime.
//!
//! Each connection runs one straight-line task: read a 4-byte
//! little-endian frame length, read that many payload bytes, write both
//! back, repeat until the peer ends the flow.

use std::{cell::RefCell, net::TcpListener, rc::Rc};

use anyhow::{Context, Result};
use fiberio_rs::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    conn::{FiberClient, ListenerClient},
    failure::Failure,
    io::{FiberReader, FiberWriter},
    select::{SelectClient, SelectDispatcher},
};
use tracing::{info, warn};

/// Frames larger than the receive buffer cannot be served in one piece.
async fn echo_session(
    mut reader: FiberReader,
    mut writer: FiberWriter,
) -> Result<(), Failure> {
    loop {
        let len: u32 = match reader.read_value().await {
            Ok(len) => len,
            // Peer is done; an orderly end between frames is success.
            Err(failure) if failure.is_warning() => return Ok(()),
            Err(failure) => return Err(failure),
        };
        if len as usize > reader.capacity() {
            return Err(Failure::Protocol(format!(
                "frame of {len} bytes exceeds the receive buffer"
            )));
        }
        let mut payload = vec![0u8; len as usize];
        reader.read_raw(&mut payload).await?;
        writer.send(&len.to_le_bytes()).await?;
        writer.send(&payload).await?;
    }
}

fn main() -> Result<()> {
    let _logger_guard = init_logger("tests/config_logger.yaml")?;

    let cfg = resolve_config_path("config.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let mut dispatcher = SelectDispatcher::new(cfg.event_loop.clone())?;

    let listener = TcpListener::bind(&cfg.listener.bind_address)
        .with_context(|| format!("failed to bind {}", cfg.listener.bind_address))?;
    info!(addr = %listener.local_addr()?, "echo server listening");

    let io_cfg = cfg.io.clone();
    let idle_us = cfg.timeouts.idle_connection_us;
    let acceptor = ListenerClient::new(
        listener,
        cfg.listener.accept_limit,
        move |stream, peer, dispatcher| {
            let client = FiberClient::spawn(stream, &io_cfg, echo_session)?;
            client.borrow_mut().on_complete(move |outcome| match outcome {
                Some(Ok(())) => info!(%peer, "session completed"),
                Some(Err(failure)) => warn!(%peer, %failure, "session failed"),
                None => warn!(%peer, "session dropped before completion"),
            });
            let fd = client.borrow().descriptor();
            dispatcher.register(client)?;
            if idle_us > 0 {
                dispatcher.set_timeout(fd, idle_us);
            }
            Ok(())
        },
    )?;

    dispatcher.register(Rc::new(RefCell::new(acceptor)))?;
    dispatcher.event_loop()?;
    info!("event loop drained; shutting down");

    Ok(())
}
