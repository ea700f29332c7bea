// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use crate::container::expiry_index::ExpiryKey;

/// Contract of anything that can be deadlined: the timeout manager calls
/// `timeout()` when the registered deadline passes.
pub trait TimeoutClient {
    fn timeout(&mut self);
}

/// One armed (or fired) deadline registration.
///
/// The expiry node is present iff the registration is armed; an armed
/// registration always points at a live client. The registration holds
/// only a weak back-edge so the client's ownership stays with its
/// select-client, not with the timeout machinery.
#[derive(Debug)]
pub struct ExpiryRegistration {
    pub(super) client: Weak<RefCell<dyn TimeoutClient>>,
    pub(super) node: Option<ExpiryKey>,
    pub(super) timed_out: bool,
}

/// Shared handle to a registration, returned by
/// [`TimeoutManager::register`](super::TimeoutManager::register).
pub type ExpiryHandle = Rc<RefCell<ExpiryRegistration>>;

impl ExpiryRegistration {
    pub(super) fn new(client: Weak<RefCell<dyn TimeoutClient>>) -> Self {
        Self {
            client,
            node: None,
            timed_out: false,
        }
    }

    /// Whether the deadline is still pending.
    pub fn is_armed(&self) -> bool {
        self.node.is_some()
    }

    /// Set when and only when `timeout()` has fired on this registration.
    pub fn has_timed_out(&self) -> bool {
        self.timed_out
    }

    /// The absolute deadline while armed.
    pub fn deadline_us(&self) -> Option<u64> {
        self.node.map(|k| k.deadline_us)
    }
}
