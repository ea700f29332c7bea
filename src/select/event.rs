// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Readiness event sets and registration identity.

use std::os::fd::RawFd;

use bitflags::bitflags;
use mio::Interest;

bitflags! {
    /// Conditions a select-client can be interested in or be handed.
    ///
    /// `ERROR`, `HANGUP` and `INVALID` are always implicitly requested;
    /// the dispatcher adds them to every registration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventSet: u8 {
        const READ     = 1 << 0;
        const WRITE    = 1 << 1;
        /// Urgent/out-of-band readability.
        const PRIORITY = 1 << 2;
        const ERROR    = 1 << 3;
        const HANGUP   = 1 << 4;
        /// The notifier rejected or invalidated the descriptor.
        const INVALID  = 1 << 5;
    }
}

impl EventSet {
    /// The conditions every registration watches regardless of the
    /// client's requested mask.
    pub const MANDATORY: EventSet = EventSet::ERROR
        .union(EventSet::HANGUP)
        .union(EventSet::INVALID);

    pub fn from_mio(event: &mio::event::Event) -> Self {
        let mut set = EventSet::empty();
        if event.is_readable() {
            set |= EventSet::READ;
        }
        if event.is_writable() {
            set |= EventSet::WRITE;
        }
        if event.is_priority() {
            set |= EventSet::PRIORITY;
        }
        if event.is_error() {
            set |= EventSet::ERROR;
        }
        if event.is_read_closed() || event.is_write_closed() {
            set |= EventSet::HANGUP;
        }
        set
    }

    /// Whether the set reports any way for the client to make progress.
    pub fn has_progress(self) -> bool {
        self.intersects(EventSet::READ | EventSet::WRITE | EventSet::PRIORITY)
    }

    /// A failure condition with no readable/writable data left: the
    /// dispatcher routes these straight to the error hook.
    pub fn is_failure_only(self) -> bool {
        self.intersects(EventSet::MANDATORY) && !self.has_progress()
    }

    /// Translation to the notifier's interest type. Error conditions
    /// need no explicit interest; a mask without read/write interest
    /// falls back to readable so the registration stays valid.
    pub fn to_interest(self) -> Interest {
        let mut interest = if self.intersects(EventSet::READ | EventSet::PRIORITY) {
            Some(Interest::READABLE)
        } else {
            None
        };
        if self.contains(EventSet::WRITE) {
            interest = Some(match interest {
                Some(i) => i | Interest::WRITABLE,
                None => Interest::WRITABLE,
            });
        }
        if self.contains(EventSet::PRIORITY) {
            interest = interest.map(|i| i | Interest::PRIORITY);
        }
        interest.unwrap_or(Interest::READABLE)
    }
}

/// What a registration is, for logs and registration identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    Listener,
    Stream,
}

/// Registration identity: the descriptor plus the kind of client bound
/// to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub fd: RawFd,
    pub kind: ClientKind,
}
