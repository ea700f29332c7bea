// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{cell::RefCell, rc::Rc};

use crate::{failure::Failure, select::event::EventSet};

/// Per-connection state shared between a driving select-client and the
/// fiber streams running inside its task.
///
/// The driver stores the latest readiness events before resuming the
/// task; the streams record which direction they are waiting for before
/// suspending, and pick up failures injected from outside (timeouts,
/// cancellation) when they resume.
#[derive(Debug)]
pub struct ReadyState {
    events: EventSet,
    want: EventSet,
    pending: Option<Failure>,
}

pub type SharedReady = Rc<RefCell<ReadyState>>;

impl ReadyState {
    pub fn new() -> Self {
        Self {
            events: EventSet::empty(),
            want: EventSet::empty(),
            pending: None,
        }
    }

    pub fn new_shared() -> SharedReady {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Latest events delivered by the dispatcher.
    pub fn events(&self) -> EventSet {
        self.events
    }

    pub fn set_events(&mut self, events: EventSet) {
        self.events = events;
    }

    /// Direction the suspended fiber is waiting for.
    pub fn want(&self) -> EventSet {
        self.want
    }

    pub fn set_want(&mut self, want: EventSet) {
        self.want = want;
    }

    /// Plants a failure for the fiber to observe on its next resume.
    pub fn inject(&mut self, failure: Failure) {
        self.pending = Some(failure);
    }

    pub fn take_failure(&mut self) -> Option<Failure> {
        self.pending.take()
    }
}

impl Default for ReadyState {
    fn default() -> Self {
        Self::new()
    }
}
