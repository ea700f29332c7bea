// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The select-client that drives one task over one descriptor.
//!
//! A [`FiberClient`] owns the descriptor, the task running the protocol
//! body, and the [`ReadyState`] bridging the two: on readiness it stores
//! the event set and resumes the task; on deadline expiry it injects
//! [`Failure::Timeout`] so the next suspended primitive observes it.
//! The completion callback fires from the finalizer with the task's
//! final result (`None` when the client left the loop before the task
//! finished).

use std::{
    cell::RefCell,
    future::Future,
    net::TcpStream,
    os::fd::{AsRawFd, OwnedFd, RawFd},
    rc::Rc,
};

use tracing::debug;

use crate::{
    cfg::config::IoConfig,
    failure::Failure,
    io::{
        FiberReader, FiberWriter,
        ready::{ReadyState, SharedReady},
        sys,
    },
    select::{
        SelectClient, SelectDispatcher,
        event::{ClientKind, EventSet},
    },
    task::{Task, TaskState},
};

type CompletionFn = Box<dyn FnOnce(Option<Result<(), Failure>>)>;

pub struct FiberClient {
    task: Task,
    ready: SharedReady,
    outcome: Option<Result<(), Failure>>,
    on_complete: Option<CompletionFn>,
    // Closes last: the task (and its reader/writer borrows of the raw
    // descriptor) must be gone before the descriptor is.
    fd: OwnedFd,
}

impl FiberClient {
    /// Wraps a connected TCP stream. The stream is switched to
    /// non-blocking and the task body runs up to its first suspension.
    pub fn spawn<F, Fut>(
        stream: TcpStream,
        io_cfg: &IoConfig,
        body: F,
    ) -> Result<Rc<RefCell<Self>>, Failure>
    where
        F: FnOnce(FiberReader, FiberWriter) -> Fut,
        Fut: Future<Output = Result<(), Failure>> + 'static,
    {
        Self::from_fd(OwnedFd::from(stream), io_cfg, body)
    }

    /// Wraps an already non-blocking descriptor of any stream flavor.
    pub fn from_fd<F, Fut>(
        fd: OwnedFd,
        io_cfg: &IoConfig,
        body: F,
    ) -> Result<Rc<RefCell<Self>>, Failure>
    where
        F: FnOnce(FiberReader, FiberWriter) -> Fut,
        Fut: Future<Output = Result<(), Failure>> + 'static,
    {
        sys::set_nonblocking(fd.as_raw_fd()).map_err(|ref e| Failure::io(e, "set_nonblocking"))?;
        let raw = fd.as_raw_fd();
        let ready = ReadyState::new_shared();
        let reader = FiberReader::new(raw, ready.clone(), io_cfg.read_buffer_bytes);
        let writer = FiberWriter::new(raw, ready.clone(), io_cfg.cork_auto_flush);
        let mut task = Task::new(body(reader, writer));
        task.start();
        Ok(Rc::new(RefCell::new(Self {
            task,
            ready,
            outcome: None,
            on_complete: None,
            fd,
        })))
    }

    /// Observes the task's final result when the client is finalized.
    pub fn on_complete(&mut self, cb: impl FnOnce(Option<Result<(), Failure>>) + 'static) {
        self.on_complete = Some(Box::new(cb));
    }

    pub fn task_state(&self) -> TaskState {
        self.task.state()
    }

    fn record_outcome(&mut self) {
        if self.outcome.is_none() {
            self.outcome = self.task.take_outcome();
        }
    }
}

impl SelectClient for FiberClient {
    fn descriptor(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn kind(&self) -> ClientKind {
        ClientKind::Stream
    }

    fn interest(&self) -> EventSet {
        let want = self.ready.borrow().want();
        if want.is_empty() { EventSet::READ } else { want }
    }

    fn handle(
        &mut self,
        events: EventSet,
        _dispatcher: &mut SelectDispatcher,
    ) -> Result<bool, Failure> {
        self.ready.borrow_mut().set_events(events);
        let state = match self.task.state() {
            TaskState::Fresh => self.task.start(),
            TaskState::Suspended => self.task.resume(),
            state => state,
        };
        if state != TaskState::Terminated {
            return Ok(true);
        }
        self.record_outcome();
        match &self.outcome {
            Some(Err(failure)) => Err(failure.clone()),
            _ => Ok(false),
        }
    }

    fn finalize(&mut self) {
        self.record_outcome();
        let outcome = self.outcome.take();
        debug!(fd = self.fd.as_raw_fd(), ?outcome, "fiber client finalized");
        if let Some(cb) = self.on_complete.take() {
            cb(outcome);
        }
    }

    fn error(&mut self, failure: &Failure, _events: EventSet) {
        self.outcome = Some(Err(failure.clone()));
    }

    fn timeout(&mut self) {
        self.ready.borrow_mut().inject(Failure::Timeout);
        if self.task.state() == TaskState::Suspended {
            self.task.resume();
            self.record_outcome();
        }
    }
}
