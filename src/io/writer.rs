// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Suspending writes over a non-blocking descriptor, with optional
//! kernel write coalescing.
//!
//! [`FiberWriter::send`] either transmits the whole buffer or fails with
//! a typed [`Failure`]; there is no partial success. While the cork is
//! engaged the kernel may hold transmitted bytes back until
//! [`FiberWriter::flush`] (or, with `cork_auto_flush`, until `send`
//! returns).

use std::os::fd::RawFd;

use tracing::trace;

use crate::{
    failure::Failure,
    io::{ready::SharedReady, sys},
    select::event::EventSet,
    task::suspend,
};

pub struct FiberWriter {
    fd: RawFd,
    ready: SharedReady,
    corked: bool,
    cork_auto_flush: bool,
}

impl FiberWriter {
    pub fn new(fd: RawFd, ready: SharedReady, cork_auto_flush: bool) -> Self {
        Self {
            fd,
            ready,
            corked: false,
            cork_auto_flush,
        }
    }

    pub fn is_corked(&self) -> bool {
        self.corked
    }

    /// Writes all of `data`, suspending while the kernel cannot take
    /// more. Success means every byte was handed to the kernel.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), Failure> {
        let mut sent = 0;
        while sent < data.len() {
            match sys::write(self.fd, &data[sent..]) {
                Ok(0) => self.wait_writable().await?,
                Ok(n) => {
                    trace!(fd = self.fd, n, "sent");
                    sent += n;
                },
                Err(ref e) if sys::retryable(e) => {
                    if self.hangup_pending() {
                        return Err(Failure::RemoteHangup);
                    }
                    self.wait_writable().await?;
                },
                Err(ref e)
                    if e.raw_os_error() == Some(libc::EPIPE)
                        || e.raw_os_error() == Some(libc::ECONNRESET) =>
                {
                    return Err(Failure::RemoteHangup);
                },
                Err(ref e) => return Err(Failure::io(e, "write")),
            }
        }
        if self.corked && self.cork_auto_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Engages or releases write coalescing (`TCP_CORK`).
    pub fn cork(&mut self, enable: bool) -> Result<(), Failure> {
        if enable == self.corked {
            return Ok(());
        }
        sys::set_cork(self.fd, enable).map_err(|ref e| Failure::io(e, "cork"))?;
        self.corked = enable;
        Ok(())
    }

    /// Forces transmission of coalesced bytes; the cork stays engaged.
    pub fn flush(&mut self) -> Result<(), Failure> {
        if !self.corked {
            return Ok(());
        }
        sys::set_cork(self.fd, false).map_err(|ref e| Failure::io(e, "uncork"))?;
        sys::set_cork(self.fd, true).map_err(|ref e| Failure::io(e, "recork"))?;
        Ok(())
    }

    /// Clears pending writer state: releases the cork and drops any
    /// injected failure.
    pub fn reset(&mut self) {
        if self.corked {
            let _ = sys::set_cork(self.fd, false);
            self.corked = false;
        }
        self.ready.borrow_mut().take_failure();
    }

    fn hangup_pending(&self) -> bool {
        self.ready.borrow().events().contains(EventSet::HANGUP)
    }

    async fn wait_writable(&mut self) -> Result<(), Failure> {
        self.ready.borrow_mut().set_want(EventSet::WRITE);
        suspend().await;
        if let Some(failure) = self.ready.borrow_mut().take_failure() {
            return Err(failure);
        }
        if self.hangup_pending() {
            return Err(Failure::RemoteHangup);
        }
        Ok(())
    }
}
