// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Suspending byte-oriented reads over a non-blocking descriptor.
//!
//! A [`FiberReader`] buffers received bytes in a fixed-size array with
//! two cursors, `consumed <= available <= capacity`: `[0, consumed)` has
//! been handed to the caller, `[consumed, available)` is buffered but
//! unconsumed, the rest is free. Every primitive that needs more bytes
//! than are buffered suspends the running task until the driver reports
//! readability again.

use std::os::fd::RawFd;

use tracing::trace;
use zerocopy::FromBytes;

use crate::{
    failure::Failure,
    io::{ready::SharedReady, sys},
    select::event::EventSet,
    task::suspend,
};

/// Result of one [`FiberReader::consume`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The consumer finished; control returns to the caller.
    Finished,
    /// The consumer needs more bytes than are buffered.
    NeedMore,
}

pub struct FiberReader {
    fd: RawFd,
    ready: SharedReady,
    buf: Box<[u8]>,
    consumed: usize,
    available: usize,
}

impl FiberReader {
    pub fn new(fd: RawFd, ready: SharedReady, capacity: usize) -> Self {
        assert!(capacity > 0, "fiber reader needs a non-empty buffer");
        Self {
            fd,
            ready,
            buf: vec![0u8; capacity].into_boxed_slice(),
            consumed: 0,
            available: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes buffered but not yet handed out.
    pub fn unconsumed(&self) -> usize {
        self.available - self.consumed
    }

    /// Drops both cursors; buffered bytes are discarded.
    pub fn reset(&mut self) {
        self.consumed = 0;
        self.available = 0;
    }

    /// Performs one receive into the free part of the buffer, suspending
    /// while nothing is available. Returns the number of bytes newly
    /// buffered.
    pub async fn receive(&mut self) -> Result<usize, Failure> {
        if self.available == self.capacity() {
            assert_eq!(
                self.consumed, self.available,
                "receive() with a full buffer of unconsumed bytes"
            );
            self.reset();
        }
        loop {
            match sys::read(self.fd, &mut self.buf[self.available..]) {
                Ok(0) => return Err(self.end_failure()),
                Ok(n) => {
                    trace!(fd = self.fd, n, "received");
                    self.available += n;
                    return Ok(n);
                },
                Err(ref e) if sys::retryable(e) => {
                    self.wait_readable().await?;
                },
                Err(ref e) => return Err(Failure::io(e, "read")),
            }
        }
    }

    /// Consumes exactly `size_of::<T>()` bytes as a bitwise copy,
    /// receiving (and suspending) as many times as needed.
    pub async fn read_value<T: FromBytes>(&mut self) -> Result<T, Failure> {
        let need = size_of::<T>();
        assert!(
            need <= self.capacity(),
            "read_value() of {need} bytes exceeds buffer capacity"
        );
        while self.unconsumed() < need {
            if self.capacity() - self.consumed < need {
                self.pack();
            }
            self.receive().await?;
        }
        let bytes = &self.buf[self.consumed..self.consumed + need];
        let value = T::read_from_bytes(bytes)
            .map_err(|_| Failure::Protocol(format!("short read of {need} byte value")))?;
        self.consumed += need;
        Ok(value)
    }

    /// Fills `out` completely, receiving as needed. `out` must not
    /// exceed the buffer capacity.
    pub async fn read_raw(&mut self, out: &mut [u8]) -> Result<(), Failure> {
        assert!(
            out.len() <= self.capacity(),
            "read_raw() of {} bytes exceeds buffer capacity",
            out.len()
        );
        while self.unconsumed() < out.len() {
            if self.capacity() - self.consumed < out.len() {
                self.pack();
            }
            self.receive().await?;
        }
        out.copy_from_slice(&self.buf[self.consumed..self.consumed + out.len()]);
        self.consumed += out.len();
        Ok(())
    }

    /// Hands the unconsumed bytes to `consume`. The consumer returns how
    /// many bytes it used: a value within the slice consumes that many
    /// and finishes; a value beyond the slice means it used everything
    /// and needs more input, so the buffer is reset for the next
    /// receive.
    pub fn consume<F>(&mut self, consume: &mut F) -> ConsumeOutcome
    where F: FnMut(&[u8]) -> usize {
        while self.consumed < self.available {
            let slice = &self.buf[self.consumed..self.available];
            let used = consume(slice);
            if used <= slice.len() {
                self.consumed += used;
                return ConsumeOutcome::Finished;
            }
            self.consumed = self.available;
            self.reset();
            return ConsumeOutcome::NeedMore;
        }
        ConsumeOutcome::NeedMore
    }

    /// Receive/consume loop: feeds `consume` until it reports finished.
    pub async fn read_consume<F>(&mut self, mut consume: F) -> Result<(), Failure>
    where F: FnMut(&[u8]) -> usize {
        loop {
            if self.consumed == self.available {
                self.receive().await?;
            }
            match self.consume(&mut consume) {
                ConsumeOutcome::Finished => return Ok(()),
                ConsumeOutcome::NeedMore => {
                    self.receive().await?;
                },
            }
        }
    }

    /// Moves `[consumed, available)` to the front of the buffer, making
    /// the full tail available for the next receive.
    fn pack(&mut self) {
        self.buf.copy_within(self.consumed..self.available, 0);
        self.available -= self.consumed;
        self.consumed = 0;
    }

    async fn wait_readable(&mut self) -> Result<(), Failure> {
        self.ready.borrow_mut().set_want(EventSet::READ);
        suspend().await;
        if let Some(failure) = self.ready.borrow_mut().take_failure() {
            return Err(failure);
        }
        Ok(())
    }

    /// Read returned zero bytes: pick the most specific failure from the
    /// pending event bits. A hangup without data is a hangup, not end of
    /// stream.
    fn end_failure(&self) -> Failure {
        let events = self.ready.borrow().events();
        if events.contains(EventSet::ERROR) {
            if let Ok(Some(errno)) = sys::socket_error(self.fd) {
                return Failure::Io {
                    errno,
                    context: "read",
                };
            }
        }
        if events.contains(EventSet::HANGUP) {
            return Failure::RemoteHangup;
        }
        Failure::EndOfFlow
    }
}
