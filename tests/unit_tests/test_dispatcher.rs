// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    cell::{Cell, RefCell},
    io::Write,
    os::{fd::AsRawFd, fd::RawFd, unix::net::UnixStream},
    rc::Rc,
    time::Instant,
};

use anyhow::Result;
use fiberio_rs::{
    cfg::config::EventLoopConfig,
    failure::Failure,
    select::{ClientKind, EventSet, SelectClient, SelectDispatcher},
};

#[derive(Clone, Copy)]
enum Behavior {
    /// Ask for unregistration after the first event.
    Quit,
    /// Fail out of the handler on the first event.
    Fail,
    /// Stay registered (the test drives removal another way).
    Stay,
    /// Request loop shutdown and stay registered.
    Shutdown,
    /// Defer own unregistration to the end of the cycle.
    DeferSelf,
}

#[derive(Clone, Default)]
struct Probes {
    handled: Rc<RefCell<Vec<EventSet>>>,
    finalized: Rc<Cell<u32>>,
    failures: Rc<RefCell<Vec<Failure>>>,
    timeouts: Rc<Cell<u32>>,
}

struct MockClient {
    fd: RawFd,
    _stream: Option<UnixStream>,
    behavior: Behavior,
    probes: Probes,
}

impl MockClient {
    fn new(stream: UnixStream, behavior: Behavior) -> (Rc<RefCell<Self>>, Probes) {
        stream.set_nonblocking(true).expect("nonblocking");
        let probes = Probes::default();
        let client = Rc::new(RefCell::new(Self {
            fd: stream.as_raw_fd(),
            _stream: Some(stream),
            behavior,
            probes: probes.clone(),
        }));
        (client, probes)
    }
}

impl SelectClient for MockClient {
    fn descriptor(&self) -> RawFd {
        self.fd
    }

    fn kind(&self) -> ClientKind {
        ClientKind::Stream
    }

    fn interest(&self) -> EventSet {
        EventSet::READ
    }

    fn handle(
        &mut self,
        events: EventSet,
        dispatcher: &mut SelectDispatcher,
    ) -> Result<bool, Failure> {
        self.probes.handled.borrow_mut().push(events);
        match self.behavior {
            Behavior::Quit => Ok(false),
            Behavior::Fail => Err(Failure::Protocol("injected handler failure".into())),
            Behavior::Stay => Ok(true),
            Behavior::Shutdown => {
                dispatcher.shutdown();
                Ok(true)
            },
            Behavior::DeferSelf => {
                dispatcher.unregister_after_select(self.fd);
                Ok(true)
            },
        }
    }

    fn finalize(&mut self) {
        self.probes.finalized.set(self.probes.finalized.get() + 1);
    }

    fn error(&mut self, failure: &Failure, _events: EventSet) {
        self.probes.failures.borrow_mut().push(failure.clone());
    }

    fn timeout(&mut self) {
        self.probes.timeouts.set(self.probes.timeouts.get() + 1);
    }
}

fn test_config() -> EventLoopConfig {
    EventLoopConfig {
        max_events: 16,
        max_wait_us: 20_000,
    }
}

#[test]
fn test_empty_live_set_returns_immediately() -> Result<()> {
    let mut dispatcher = SelectDispatcher::new(test_config())?;
    dispatcher.event_loop()?;
    Ok(())
}

#[test]
fn test_handle_false_unregisters_and_finalizes_once() -> Result<()> {
    let mut dispatcher = SelectDispatcher::new(test_config())?;
    let (ours, mut theirs) = UnixStream::pair()?;
    let (client, probes) = MockClient::new(ours, Behavior::Quit);

    dispatcher.register(client)?;
    assert_eq!(dispatcher.client_count(), 1);

    theirs.write_all(b"ping")?;
    dispatcher.event_loop()?;

    assert_eq!(probes.handled.borrow().len(), 1);
    assert!(probes.handled.borrow()[0].contains(EventSet::READ));
    assert_eq!(probes.finalized.get(), 1);
    assert_eq!(dispatcher.client_count(), 0);
    Ok(())
}

#[test]
fn test_handler_failure_routes_to_error_hook() -> Result<()> {
    let mut dispatcher = SelectDispatcher::new(test_config())?;
    let (ours, mut theirs) = UnixStream::pair()?;
    let (client, probes) = MockClient::new(ours, Behavior::Fail);

    dispatcher.register(client)?;
    theirs.write_all(b"ping")?;
    dispatcher.event_loop()?;

    let failures = probes.failures.borrow();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], Failure::Protocol(_)));
    assert_eq!(probes.finalized.get(), 1, "finalize still runs exactly once");
    Ok(())
}

#[test]
fn test_shutdown_returns_with_clients_registered() -> Result<()> {
    let mut dispatcher = SelectDispatcher::new(test_config())?;
    let (ours, mut theirs) = UnixStream::pair()?;
    let (client, probes) = MockClient::new(ours, Behavior::Shutdown);

    dispatcher.register(client)?;
    theirs.write_all(b"ping")?;
    dispatcher.event_loop()?;

    assert_eq!(probes.handled.borrow().len(), 1);
    assert_eq!(probes.finalized.get(), 0);
    assert_eq!(dispatcher.client_count(), 1, "shutdown leaves the live set alone");
    Ok(())
}

#[test]
fn test_deferred_unregistration_applies_after_the_cycle() -> Result<()> {
    let mut dispatcher = SelectDispatcher::new(test_config())?;
    let (ours, mut theirs) = UnixStream::pair()?;
    let (client, probes) = MockClient::new(ours, Behavior::DeferSelf);

    dispatcher.register(client)?;
    theirs.write_all(b"ping")?;
    dispatcher.event_loop()?;

    assert_eq!(probes.handled.borrow().len(), 1);
    assert_eq!(probes.finalized.get(), 1);
    assert_eq!(dispatcher.client_count(), 0);
    Ok(())
}

#[test]
fn test_peer_close_reaches_handler_with_hangup_bit() -> Result<()> {
    let mut dispatcher = SelectDispatcher::new(test_config())?;
    let (ours, theirs) = UnixStream::pair()?;
    let (client, probes) = MockClient::new(ours, Behavior::Quit);

    dispatcher.register(client)?;
    drop(theirs);
    dispatcher.event_loop()?;

    // A closed peer still reports readability (the pending EOF), so the
    // handler runs and may drain buffered data first.
    let handled = probes.handled.borrow();
    assert_eq!(handled.len(), 1);
    assert!(handled[0].contains(EventSet::HANGUP));
    assert_eq!(probes.finalized.get(), 1);
    Ok(())
}

#[test]
fn test_hangup_without_readability_hits_error_hook() -> Result<()> {
    let mut dispatcher = SelectDispatcher::new(test_config())?;
    // A pipe whose writer is gone reports a bare hangup, never
    // readability: the dispatcher routes it straight to the error hook.
    let (reader, writer) = std::io::pipe()?;
    let probes = Probes::default();
    let client: Rc<RefCell<MockClient>> = Rc::new(RefCell::new(MockClient {
        fd: reader.as_raw_fd(),
        _stream: None,
        behavior: Behavior::Stay,
        probes: probes.clone(),
    }));

    dispatcher.register(client)?;
    drop(writer);
    dispatcher.event_loop()?;

    let failures = probes.failures.borrow();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0], Failure::RemoteHangup);
    assert!(probes.handled.borrow().is_empty(), "handler is bypassed");
    assert_eq!(probes.finalized.get(), 1);
    drop(reader);
    Ok(())
}

#[test]
fn test_timeout_fires_after_deadline_and_unregisters() -> Result<()> {
    let mut dispatcher = SelectDispatcher::new(test_config())?;
    let (ours, theirs) = UnixStream::pair()?;
    let (client, probes) = MockClient::new(ours, Behavior::Stay);
    let fd = client.borrow().descriptor();

    dispatcher.register(client)?;
    assert!(dispatcher.set_timeout(fd, 100_000));
    assert!(!dispatcher.set_timeout(fd, 0), "zero timeout never arms");
    assert!(dispatcher.set_timeout(fd, 100_000), "re-arming replaces");

    let started = Instant::now();
    dispatcher.event_loop()?;
    let elapsed = started.elapsed();

    assert!(
        elapsed.as_micros() >= 95_000,
        "deadline fired early: {elapsed:?}"
    );
    assert_eq!(probes.timeouts.get(), 1);
    assert_eq!(probes.finalized.get(), 1);
    assert_eq!(dispatcher.client_count(), 0);
    drop(theirs);
    Ok(())
}

#[test]
fn test_clear_timeout_disarms() -> Result<()> {
    let mut dispatcher = SelectDispatcher::new(test_config())?;
    let (ours, mut theirs) = UnixStream::pair()?;
    let (client, probes) = MockClient::new(ours, Behavior::Quit);
    let fd = client.borrow().descriptor();

    dispatcher.register(client)?;
    dispatcher.set_timeout(fd, 50_000);
    dispatcher.clear_timeout(fd);

    theirs.write_all(b"ping")?;
    dispatcher.event_loop()?;

    assert_eq!(probes.timeouts.get(), 0);
    assert_eq!(probes.finalized.get(), 1);
    Ok(())
}

#[test]
fn test_replacing_a_descriptor_does_not_finalize_the_old_client() -> Result<()> {
    let mut dispatcher = SelectDispatcher::new(test_config())?;
    let (ours, mut theirs) = UnixStream::pair()?;
    ours.set_nonblocking(true)?;
    let fd = ours.as_raw_fd();

    let old_probes = Probes::default();
    let old: Rc<RefCell<MockClient>> = Rc::new(RefCell::new(MockClient {
        fd,
        _stream: None,
        behavior: Behavior::Stay,
        probes: old_probes.clone(),
    }));
    let new_probes = Probes::default();
    let new: Rc<RefCell<MockClient>> = Rc::new(RefCell::new(MockClient {
        fd,
        _stream: Some(ours),
        behavior: Behavior::Quit,
        probes: new_probes.clone(),
    }));

    dispatcher.register(old)?;
    dispatcher.register(new)?;
    assert_eq!(dispatcher.client_count(), 1);

    theirs.write_all(b"ping")?;
    dispatcher.event_loop()?;

    assert!(old_probes.handled.borrow().is_empty());
    assert_eq!(old_probes.finalized.get(), 0, "replaced client is never finalized");
    assert_eq!(new_probes.handled.borrow().len(), 1);
    assert_eq!(new_probes.finalized.get(), 1);
    Ok(())
}

#[test]
fn test_register_is_idempotent_for_the_same_client() -> Result<()> {
    let mut dispatcher = SelectDispatcher::new(test_config())?;
    let (ours, mut theirs) = UnixStream::pair()?;
    let (client, probes) = MockClient::new(ours, Behavior::Quit);

    dispatcher.register(client.clone())?;
    dispatcher.register(client)?;
    assert_eq!(dispatcher.client_count(), 1);

    theirs.write_all(b"ping")?;
    dispatcher.event_loop()?;
    assert_eq!(probes.finalized.get(), 1);
    Ok(())
}

#[test]
fn test_explicit_unregister_finalizes() -> Result<()> {
    let mut dispatcher = SelectDispatcher::new(test_config())?;
    let (ours, theirs) = UnixStream::pair()?;
    let (client, probes) = MockClient::new(ours, Behavior::Stay);
    let fd = client.borrow().descriptor();

    dispatcher.register(client)?;
    dispatcher.unregister(fd);

    assert_eq!(probes.finalized.get(), 1);
    assert_eq!(dispatcher.client_count(), 0);
    dispatcher.unregister(fd); // absent: no-op
    assert_eq!(probes.finalized.get(), 1);
    drop(theirs);
    Ok(())
}
