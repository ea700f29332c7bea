// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Deadline bookkeeping for the event loop.
//!
//! Clients register a callback together with a relative timeout; the
//! manager keeps all pending deadlines in an ordered index and fires the
//! callbacks of every expired one from [`TimeoutManager::check`]. The
//! dispatcher only ever needs `us_left()` to size its poll wait; it
//! never sees wall-clock deadlines itself.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use tracing::trace;

use crate::{
    container::expiry_index::ExpiryIndex,
    timeout::registration::{ExpiryHandle, ExpiryRegistration, TimeoutClient},
};

/// Notification glue: invoked whenever the minimum pending deadline
/// changes, so an embedding can arm a single "next expiry" timer.
///
/// Hooks must not call back into the manager.
pub trait DeadlineHook {
    fn set_deadline(&mut self, abs_us: u64);
    fn clear_deadline(&mut self);
}

struct Inner {
    index: ExpiryIndex<ExpiryHandle>,
    hook: Option<Box<dyn DeadlineHook>>,
}

/// Cheaply cloneable manager handle; all clones share one index.
#[derive(Clone)]
pub struct TimeoutManager {
    inner: Rc<RefCell<Inner>>,
    in_check: Rc<Cell<bool>>,
}

impl TimeoutManager {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                index: ExpiryIndex::new(),
                hook: None,
            })),
            in_check: Rc::new(Cell::new(false)),
        }
    }

    pub fn with_hook(hook: Box<dyn DeadlineHook>) -> Self {
        let mgr = Self::new();
        mgr.inner.borrow_mut().hook = Some(hook);
        mgr
    }

    /// Arms a deadline `timeout_us` from `now_us` for `client`.
    ///
    /// Zero and negative timeouts are ignored and return `None` ("not
    /// armed"). Must not be called from inside a `timeout()` callback;
    /// re-arming is only legal after `check()` has returned.
    pub fn register(
        &self,
        client: &Rc<RefCell<dyn TimeoutClient>>,
        timeout_us: i64,
        now_us: u64,
    ) -> Option<ExpiryHandle> {
        assert!(
            !self.in_check.get(),
            "timeout manager: register() called from inside a timeout() callback"
        );
        if timeout_us <= 0 {
            return None;
        }
        let deadline = now_us + timeout_us as u64;

        let mut inner = self.inner.borrow_mut();
        let before = inner.index.next_deadline_us();
        let handle: ExpiryHandle = Rc::new(RefCell::new(ExpiryRegistration::new(
            Rc::downgrade(client),
        )));
        let key = inner.index.insert(deadline, handle.clone());
        handle.borrow_mut().node = Some(key);
        Self::notify(&mut inner, before);
        trace!(deadline_us = deadline, "armed expiry registration");
        Some(handle)
    }

    /// Disarms `handle`; already-expired or never-armed handles are a
    /// no-op. Calling this from inside a `timeout()` callback is a
    /// program error.
    pub fn unregister(&self, handle: &ExpiryHandle) {
        assert!(
            !self.in_check.get(),
            "timeout manager: unregister() called from inside a timeout() callback"
        );
        let mut inner = self.inner.borrow_mut();
        let before = inner.index.next_deadline_us();
        if let Some(key) = handle.borrow_mut().node.take() {
            inner.index.remove(&key);
        }
        Self::notify(&mut inner, before);
    }

    /// Fires every deadline at or before `now_us`, in expiry order.
    ///
    /// Fired registrations are disarmed only after the iteration has
    /// finished, never while callbacks still run. Returns the number of
    /// callbacks fired.
    pub fn check(&self, now_us: u64) -> usize {
        assert!(
            !self.in_check.get(),
            "timeout manager: check() reentered from a timeout() callback"
        );
        let before = self.inner.borrow().index.next_deadline_us();
        self.in_check.set(true);

        let mut fired: Vec<ExpiryHandle> = Vec::new();
        loop {
            let popped = self.inner.borrow_mut().index.pop_expired(now_us);
            let Some((_key, handle)) = popped else { break };
            let client = {
                let mut reg = handle.borrow_mut();
                reg.timed_out = true;
                reg.client.upgrade()
            };
            if let Some(client) = client {
                client.borrow_mut().timeout();
            }
            fired.push(handle);
        }

        self.in_check.set(false);
        // Disarm after the iteration completed.
        for handle in &fired {
            handle.borrow_mut().node = None;
        }

        let mut inner = self.inner.borrow_mut();
        Self::notify(&mut inner, before);
        fired.len()
    }

    /// Earliest pending deadline, `u64::MAX` when none is armed.
    pub fn next_deadline_us(&self) -> u64 {
        self.inner
            .borrow()
            .index
            .next_deadline_us()
            .unwrap_or(u64::MAX)
    }

    /// Microseconds until the earliest deadline, clamped at zero;
    /// `u64::MAX` when none is armed.
    pub fn us_left(&self, now_us: u64) -> u64 {
        match self.inner.borrow().index.next_deadline_us() {
            Some(deadline) => deadline.saturating_sub(now_us),
            None => u64::MAX,
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.borrow().index.len()
    }

    fn notify(inner: &mut Inner, before: Option<u64>) {
        let after = inner.index.next_deadline_us();
        if before == after {
            return;
        }
        if let Some(hook) = inner.hook.as_mut() {
            match after {
                Some(deadline) => hook.set_deadline(deadline),
                None => hook.clear_deadline(),
            }
        }
    }
}

impl Default for TimeoutManager {
    fn default() -> Self {
        Self::new()
    }
}
