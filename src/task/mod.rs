// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Cooperative tasks.
//!
//! A [`Task`] is a unit of straight-line protocol code that suspends at
//! explicit points and is resumed by an external driver, typically a
//! select-client reacting to readiness. Tasks are backed by a pinned
//! `Future` state machine: `async` syntax provides the straight-line
//! form, [`suspend`] (and the fiber I/O primitives built on it) provide
//! the suspension points. Polling uses a no-op waker; nothing is ever
//! scheduled behind the driver's back.
//!
//! At most one task runs at any instant: the whole runtime is confined
//! to one thread and a driver resumes exactly one task at a time.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};

use crate::failure::Failure;

type TaskFuture = Pin<Box<dyn Future<Output = Result<(), Failure>>>>;

/// Lifecycle of a task.
///
/// `Fresh → Running ↔ Suspended → Terminated`; a terminated task may be
/// brought back to `Fresh` with [`Task::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Fresh,
    Running,
    Suspended,
    Terminated,
}

pub struct Task {
    fut: Option<TaskFuture>,
    state: TaskState,
    outcome: Option<Result<(), Failure>>,
}

impl Task {
    pub fn new(fut: impl Future<Output = Result<(), Failure>> + 'static) -> Self {
        Self {
            fut: Some(Box::pin(fut)),
            state: TaskState::Fresh,
            outcome: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Runs a fresh task up to its first suspension point (or to
    /// completion). Panics unless the task is `Fresh`.
    pub fn start(&mut self) -> TaskState {
        assert_eq!(
            self.state,
            TaskState::Fresh,
            "start() on a task that is not fresh"
        );
        self.poll_once()
    }

    /// Continues a suspended task. Panics unless the task is
    /// `Suspended`; resuming a terminated task is a logic error.
    pub fn resume(&mut self) -> TaskState {
        assert_eq!(
            self.state,
            TaskState::Suspended,
            "resume() on a task that is not suspended"
        );
        self.poll_once()
    }

    /// Rearms a terminated task with a new body, back to `Fresh`.
    pub fn reset(&mut self, fut: impl Future<Output = Result<(), Failure>> + 'static) {
        assert_eq!(
            self.state,
            TaskState::Terminated,
            "reset() on a task that has not terminated"
        );
        self.fut = Some(Box::pin(fut));
        self.state = TaskState::Fresh;
        self.outcome = None;
    }

    /// The final result of a terminated task, once.
    pub fn take_outcome(&mut self) -> Option<Result<(), Failure>> {
        self.outcome.take()
    }

    fn poll_once(&mut self) -> TaskState {
        let fut = match self.fut.as_mut() {
            Some(f) => f,
            // State assertions above keep this unreachable.
            None => return self.state,
        };
        self.state = TaskState::Running;
        let mut cx = Context::from_waker(Waker::noop());
        match fut.as_mut().poll(&mut cx) {
            Poll::Pending => self.state = TaskState::Suspended,
            Poll::Ready(outcome) => {
                self.state = TaskState::Terminated;
                self.outcome = Some(outcome);
                self.fut = None;
            },
        }
        self.state
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("state", &self.state)
            .field("outcome", &self.outcome)
            .finish()
    }
}

/// Yields control back to the driver exactly once.
///
/// This is the suspension point every fiber primitive bottoms out in;
/// the next `resume()` continues right after the `.await`.
pub fn suspend() -> Suspend {
    Suspend { yielded: false }
}

#[derive(Debug)]
pub struct Suspend {
    yielded: bool,
}

impl Future for Suspend {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            Poll::Pending
        }
    }
}
