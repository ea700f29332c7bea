// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::os::fd::RawFd;

use tracing::warn;

use crate::{
    failure::Failure,
    select::{
        dispatcher::SelectDispatcher,
        event::{ClientKey, ClientKind, EventSet},
    },
};

/// Contract of every event loop participant.
///
/// The dispatcher keys registrations by [`descriptor`](Self::descriptor),
/// watches [`interest`](Self::interest) plus the mandatory error
/// conditions, and invokes [`handle`](Self::handle) on readiness. Leaving
/// the live set (by returning `false`, failing, timing out or being
/// explicitly unregistered) runs [`finalize`](Self::finalize) exactly
/// once. The descriptor must stay valid for the whole registration.
pub trait SelectClient {
    fn descriptor(&self) -> RawFd;

    fn kind(&self) -> ClientKind;

    /// Registration identity.
    fn key(&self) -> ClientKey {
        ClientKey {
            fd: self.descriptor(),
            kind: self.kind(),
        }
    }

    /// The conditions the client currently wants to be woken for. The
    /// dispatcher re-reads this after every `handle` and re-arms the
    /// registration when it changed.
    fn interest(&self) -> EventSet;

    /// React to readiness. `Ok(true)` stays registered, `Ok(false)`
    /// requests unregistration, `Err` routes through
    /// [`error`](Self::error) and unregisters.
    ///
    /// The dispatcher passes itself in so handlers can register further
    /// clients, bind deadlines or request shutdown.
    fn handle(
        &mut self,
        events: EventSet,
        dispatcher: &mut SelectDispatcher,
    ) -> Result<bool, Failure>;

    /// Runs exactly once after the client has left the live set.
    fn finalize(&mut self) {}

    /// Invoked with the failure that is taking the client out of the
    /// loop: a failure-only readiness condition or an `Err` from
    /// `handle`.
    fn error(&mut self, failure: &Failure, events: EventSet) {
        warn!(fd = self.descriptor(), ?events, %failure, "select client failed");
    }

    /// Invoked when a deadline bound via
    /// [`SelectDispatcher::set_timeout`] expires. The dispatcher
    /// unregisters the client afterwards.
    fn timeout(&mut self) {}
}
