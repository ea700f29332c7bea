// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Accepting select-client: drains the accept queue on readability and
//! hands every new connection to a spawn callback, which typically
//! builds a [`FiberClient`](crate::conn::FiberClient) and registers it.

use std::{
    io::ErrorKind,
    net::{SocketAddr, TcpListener, TcpStream},
    os::fd::{AsRawFd, RawFd},
};

use tracing::{debug, info, warn};

use crate::{
    failure::Failure,
    select::{
        SelectClient, SelectDispatcher,
        event::{ClientKind, EventSet},
    },
};

type SpawnFn =
    Box<dyn FnMut(TcpStream, SocketAddr, &mut SelectDispatcher) -> Result<(), Failure>>;

pub struct ListenerClient {
    listener: TcpListener,
    accept_limit: Option<u32>,
    accepted: u32,
    spawn: SpawnFn,
}

impl ListenerClient {
    /// Wraps a bound listener. With an accept limit the client asks to
    /// be unregistered once that many connections have been accepted,
    /// letting a draining server's event loop run empty.
    pub fn new<F>(
        listener: TcpListener,
        accept_limit: Option<u32>,
        spawn: F,
    ) -> Result<Self, Failure>
    where
        F: FnMut(TcpStream, SocketAddr, &mut SelectDispatcher) -> Result<(), Failure> + 'static,
    {
        listener
            .set_nonblocking(true)
            .map_err(|ref e| Failure::io(e, "set_nonblocking"))?;
        Ok(Self {
            listener,
            accept_limit,
            accepted: 0,
            spawn: Box::new(spawn),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Failure> {
        self.listener
            .local_addr()
            .map_err(|ref e| Failure::io(e, "local_addr"))
    }
}

impl SelectClient for ListenerClient {
    fn descriptor(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    fn kind(&self) -> ClientKind {
        ClientKind::Listener
    }

    fn interest(&self) -> EventSet {
        EventSet::READ
    }

    fn handle(
        &mut self,
        _events: EventSet,
        dispatcher: &mut SelectDispatcher,
    ) -> Result<bool, Failure> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    self.accepted += 1;
                    info!(%peer, accepted = self.accepted, "accepted connection");
                    if let Err(failure) = (self.spawn)(stream, peer, dispatcher) {
                        // One refused connection must not take the
                        // listener down.
                        warn!(%peer, %failure, "spawning connection client failed");
                    }
                    if self.accept_limit.is_some_and(|limit| self.accepted >= limit) {
                        debug!(limit = self.accepted, "accept limit reached");
                        return Ok(false);
                    }
                },
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(true),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {},
                Err(ref e) => return Err(Failure::io(e, "accept")),
            }
        }
    }

    fn finalize(&mut self) {
        debug!(accepted = self.accepted, "listener finalized");
    }
}
