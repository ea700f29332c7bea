// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The event dispatcher: owns the readiness notifier, the live set of
//! select-clients and the deadline bookkeeping, and runs the loop that
//! drives everything else.
//!
//! One loop iteration delivers all readiness events the notifier
//! returned (in the notifier's order), applies deferred
//! unregistrations, then fires expired deadlines. A client that leaves
//! the live set (on its own request, on failure, on timeout or through
//! explicit unregistration) has its finalizer run exactly once.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    io::ErrorKind,
    mem,
    os::fd::RawFd,
    rc::{Rc, Weak},
    time::Duration,
};

use mio::{Events, Poll, Token, unix::SourceFd};
use tracing::{debug, trace, warn};

use crate::{
    cfg::config::EventLoopConfig,
    failure::Failure,
    io::sys,
    select::{
        client::SelectClient,
        event::{ClientKind, EventSet},
    },
    timeout::{ExpiryHandle, TimeoutClient, TimeoutManager},
    utils::now_us,
};

/// An armed per-client deadline: the manager handle plus the adapter the
/// manager fires into (kept alive here; the manager only holds a weak
/// edge).
struct ArmedDeadline {
    handle: ExpiryHandle,
    _target: Rc<RefCell<dyn TimeoutClient>>,
}

struct ClientEntry {
    fd: RawFd,
    kind: ClientKind,
    client: Rc<RefCell<dyn SelectClient>>,
    finalized: Cell<bool>,
    interest: Cell<EventSet>,
    expiry: RefCell<Option<ArmedDeadline>>,
}

/// Adapter registered with the timeout manager for a deadlined client:
/// forwards `timeout()` and records the descriptor so the dispatcher can
/// unregister the client after the check pass.
struct ExpiryTarget {
    fd: RawFd,
    fired: Rc<RefCell<Vec<RawFd>>>,
    client: Weak<RefCell<dyn SelectClient>>,
}

impl TimeoutClient for ExpiryTarget {
    fn timeout(&mut self) {
        self.fired.borrow_mut().push(self.fd);
        if let Some(client) = self.client.upgrade() {
            client.borrow_mut().timeout();
        }
    }
}

pub struct SelectDispatcher {
    poll: Poll,
    clients: HashMap<RawFd, Rc<ClientEntry>>,
    /// Descriptors whose unregistration is postponed to the end of the
    /// current dispatch cycle.
    deferred: Vec<RawFd>,
    /// Descriptors whose deadline fired in the current check pass.
    timed_out: Rc<RefCell<Vec<RawFd>>>,
    timeouts: TimeoutManager,
    /// Descriptor whose `handle` is currently on the stack.
    dispatching: Option<RawFd>,
    shutdown: bool,
    cfg: EventLoopConfig,
}

impl SelectDispatcher {
    pub fn new(cfg: EventLoopConfig) -> Result<Self, Failure> {
        let poll = Poll::new().map_err(|e| Failure::io(&e, "create readiness notifier"))?;
        Ok(Self {
            poll,
            clients: HashMap::new(),
            deferred: Vec::new(),
            timed_out: Rc::new(RefCell::new(Vec::new())),
            timeouts: TimeoutManager::new(),
            dispatching: None,
            shutdown: false,
            cfg,
        })
    }

    /// Number of clients in the live set.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.clients.contains_key(&fd)
    }

    /// Adds `client` to the live set, watching its interest mask plus
    /// the mandatory error conditions.
    ///
    /// Idempotent on the (descriptor, client) pair: re-registering the
    /// same client only refreshes its interest. A *different* client on
    /// an already registered descriptor replaces the old one silently;
    /// the old finalizer does not run. Unregister first if it must.
    pub fn register(&mut self, client: Rc<RefCell<dyn SelectClient>>) -> Result<(), Failure> {
        let (fd, kind, requested) = {
            let c = client.borrow();
            (c.descriptor(), c.kind(), c.interest())
        };
        let mask = requested | EventSet::MANDATORY;
        let token = Token(fd as usize);

        let replace = match self.clients.get(&fd) {
            Some(existing) if Rc::ptr_eq(&existing.client, &client) => {
                if existing.interest.get() != mask {
                    self.poll
                        .registry()
                        .reregister(&mut SourceFd(&fd), token, mask.to_interest())
                        .map_err(|e| Failure::io(&e, "refresh notifier interest"))?;
                    existing.interest.set(mask);
                }
                return Ok(());
            },
            Some(_) => true,
            None => false,
        };

        if replace {
            if let Some(old) = self.clients.remove(&fd) {
                warn!(
                    fd,
                    old_kind = ?old.kind,
                    new_kind = ?kind,
                    "descriptor re-registered with a different client; \
                     replacing without finalizing the previous one"
                );
                // The replaced client's finalizer must never run.
                old.finalized.set(true);
                if let Some(armed) = old.expiry.borrow_mut().take() {
                    self.timeouts.unregister(&armed.handle);
                }
            }
        }

        let registered = if replace {
            self.poll
                .registry()
                .reregister(&mut SourceFd(&fd), token, mask.to_interest())
        } else {
            self.poll
                .registry()
                .register(&mut SourceFd(&fd), token, mask.to_interest())
        };
        if let Err(e) = registered {
            let failure = Failure::io(&e, "register descriptor with notifier");
            client.borrow_mut().error(&failure, EventSet::INVALID);
            return Err(failure);
        }

        // A pending deferred unregistration must not kill the fresh
        // registration at the end of this cycle.
        self.deferred.retain(|&d| d != fd);

        debug!(fd, ?kind, ?mask, "registered select client");
        self.clients.insert(
            fd,
            Rc::new(ClientEntry {
                fd,
                kind,
                client,
                finalized: Cell::new(false),
                interest: Cell::new(mask),
                expiry: RefCell::new(None),
            }),
        );
        Ok(())
    }

    /// Removes the client from the notifier, clears its deadline and
    /// runs its finalizer (exactly once). Safe to call from inside the
    /// client's own handler: the finalizer then runs when the handler
    /// returns.
    pub fn unregister(&mut self, fd: RawFd) {
        let Some(entry) = self.clients.remove(&fd) else {
            return;
        };
        self.detach(&entry);
        if self.dispatching == Some(fd) {
            // handle() for this client is on the stack; the dispatch
            // epilogue runs the finalizer once the borrow is released.
            return;
        }
        Self::finalize_entry(&entry);
    }

    /// Defers unregistration to the end of the current dispatch cycle.
    /// Needed when an external callback invalidates a descriptor while
    /// the notifier may still report it in this very cycle.
    pub fn unregister_after_select(&mut self, fd: RawFd) {
        if self.clients.contains_key(&fd) && !self.deferred.contains(&fd) {
            self.deferred.push(fd);
        }
    }

    /// Binds a deadline `timeout_us` from now to the registered client.
    /// Replaces any earlier deadline. Returns whether a deadline was
    /// armed (zero and negative timeouts never arm).
    pub fn set_timeout(&mut self, fd: RawFd, timeout_us: i64) -> bool {
        let Some(entry) = self.clients.get(&fd).cloned() else {
            return false;
        };
        let mut slot = entry.expiry.borrow_mut();
        if let Some(armed) = slot.take() {
            self.timeouts.unregister(&armed.handle);
        }
        let target: Rc<RefCell<dyn TimeoutClient>> = Rc::new(RefCell::new(ExpiryTarget {
            fd,
            fired: self.timed_out.clone(),
            client: Rc::downgrade(&entry.client),
        }));
        match self.timeouts.register(&target, timeout_us, now_us()) {
            Some(handle) => {
                *slot = Some(ArmedDeadline {
                    handle,
                    _target: target,
                });
                true
            },
            None => false,
        }
    }

    pub fn clear_timeout(&mut self, fd: RawFd) {
        let Some(entry) = self.clients.get(&fd).cloned() else {
            return;
        };
        if let Some(armed) = entry.expiry.borrow_mut().take() {
            self.timeouts.unregister(&armed.handle);
        }
    }

    /// Makes `event_loop` return at its next top-of-loop check.
    pub fn shutdown(&mut self) {
        self.shutdown = true;
    }

    /// Runs the loop until the live set empties or `shutdown()` is
    /// observed. Notifier failures other than wait timeouts are fatal.
    pub fn event_loop(&mut self) -> Result<(), Failure> {
        let mut events = Events::with_capacity(self.cfg.max_events.max(1));
        loop {
            if self.shutdown {
                self.shutdown = false;
                debug!("event loop: shutdown observed");
                return Ok(());
            }
            if self.clients.is_empty() {
                debug!("event loop: live set empty");
                return Ok(());
            }

            let wait = self.timeouts.us_left(now_us()).min(self.cfg.max_wait_us);
            if let Err(e) = self
                .poll
                .poll(&mut events, Some(Duration::from_micros(wait)))
            {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(Failure::io(&e, "poll readiness notifier"));
            }

            for event in events.iter() {
                let fd = event.token().0 as RawFd;
                self.dispatch(fd, EventSet::from_mio(event));
            }

            for fd in mem::take(&mut self.deferred) {
                trace!(fd, "applying deferred unregistration");
                self.remove_and_finalize(fd);
            }

            // Within one iteration, deadlines fire after readiness.
            if self.timeouts.check(now_us()) > 0 {
                let fired: Vec<RawFd> = self.timed_out.borrow_mut().drain(..).collect();
                for fd in fired {
                    self.remove_and_finalize(fd);
                }
            }
        }
    }

    fn dispatch(&mut self, fd: RawFd, events: EventSet) {
        let Some(entry) = self.clients.get(&fd).cloned() else {
            // Deferred-unregister race: the notifier can still report a
            // descriptor that left the set earlier in this cycle.
            trace!(fd, "event for unregistered descriptor skipped");
            return;
        };
        self.dispatching = Some(fd);
        let mut remove = false;

        if events.is_failure_only() {
            let failure = self.probe_failure(fd, events);
            debug!(fd, ?events, %failure, "failure condition from notifier");
            entry.client.borrow_mut().error(&failure, events);
            remove = true;
        } else {
            // Bind the verdict first so the client borrow is released
            // before the error hook may need it again.
            let verdict = entry.client.borrow_mut().handle(events, self);
            match verdict {
                Ok(true) => {},
                Ok(false) => remove = true,
                Err(failure) => {
                    entry.client.borrow_mut().error(&failure, events);
                    remove = true;
                },
            }
        }
        self.dispatching = None;

        let still_registered = self
            .clients
            .get(&fd)
            .is_some_and(|e| Rc::ptr_eq(e, &entry));
        if remove {
            if still_registered {
                self.clients.remove(&fd);
                self.detach(&entry);
            }
            Self::finalize_entry(&entry);
        } else if still_registered {
            self.rearm_interest(&entry);
        } else {
            // The handler unregistered itself mid-dispatch; the finalize
            // is paired here. Silently replaced clients already carry
            // the finalized flag.
            Self::finalize_entry(&entry);
        }
    }

    fn rearm_interest(&mut self, entry: &ClientEntry) {
        let mask = entry.client.borrow().interest() | EventSet::MANDATORY;
        if mask == entry.interest.get() {
            return;
        }
        let token = Token(entry.fd as usize);
        match self
            .poll
            .registry()
            .reregister(&mut SourceFd(&entry.fd), token, mask.to_interest())
        {
            Ok(()) => entry.interest.set(mask),
            Err(e) => warn!(fd = entry.fd, error = %e, "interest rearm failed"),
        }
    }

    fn probe_failure(&self, fd: RawFd, events: EventSet) -> Failure {
        if events.contains(EventSet::ERROR) {
            if let Ok(Some(errno)) = sys::socket_error(fd) {
                return Failure::Io {
                    errno,
                    context: "socket error reported by notifier",
                };
            }
            return Failure::Io {
                errno: 0,
                context: "error condition reported by notifier",
            };
        }
        if events.contains(EventSet::HANGUP) {
            return Failure::RemoteHangup;
        }
        Failure::Io {
            errno: libc::EBADF,
            context: "invalid descriptor reported by notifier",
        }
    }

    fn remove_and_finalize(&mut self, fd: RawFd) {
        let Some(entry) = self.clients.remove(&fd) else {
            return;
        };
        self.detach(&entry);
        Self::finalize_entry(&entry);
    }

    fn detach(&mut self, entry: &ClientEntry) {
        // The descriptor may already be gone; deregistration errors are
        // not actionable at this point.
        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&entry.fd)) {
            trace!(fd = entry.fd, error = %e, "deregister from notifier failed");
        }
        if let Some(armed) = entry.expiry.borrow_mut().take() {
            self.timeouts.unregister(&armed.handle);
        }
    }

    fn finalize_entry(entry: &ClientEntry) {
        if !entry.finalized.replace(true) {
            trace!(fd = entry.fd, kind = ?entry.kind, "finalizing client");
            entry.client.borrow_mut().finalize();
        }
    }
}
