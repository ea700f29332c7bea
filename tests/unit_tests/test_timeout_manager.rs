// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use fiberio_rs::timeout::{DeadlineHook, ExpiryHandle, TimeoutClient, TimeoutManager};

struct CountingClient {
    fired: Rc<Cell<u32>>,
}

impl TimeoutClient for CountingClient {
    fn timeout(&mut self) {
        self.fired.set(self.fired.get() + 1);
    }
}

fn counting_client() -> (Rc<RefCell<dyn TimeoutClient>>, Rc<Cell<u32>>) {
    let fired = Rc::new(Cell::new(0));
    let client: Rc<RefCell<dyn TimeoutClient>> = Rc::new(RefCell::new(CountingClient {
        fired: fired.clone(),
    }));
    (client, fired)
}

#[test]
fn test_fires_exactly_once_at_deadline() {
    let mgr = TimeoutManager::new();
    let (client, fired) = counting_client();

    let handle = mgr
        .register(&client, 100_000, 1_000_000)
        .expect("positive timeout must arm");
    assert!(handle.borrow().is_armed());
    assert_eq!(handle.borrow().deadline_us(), Some(1_100_000));

    assert_eq!(mgr.check(1_099_999), 0, "not due yet");
    assert_eq!(fired.get(), 0);

    assert_eq!(mgr.check(1_100_000), 1);
    assert_eq!(fired.get(), 1);
    assert!(handle.borrow().has_timed_out());
    assert!(!handle.borrow().is_armed());

    assert_eq!(mgr.check(2_000_000), 0, "a fired registration stays quiet");
    assert_eq!(fired.get(), 1);
}

#[test]
fn test_equal_deadlines_fire_in_one_check() {
    let mgr = TimeoutManager::new();
    let mut fired = Vec::new();
    for _ in 0..3 {
        let (client, count) = counting_client();
        mgr.register(&client, 50_000, 0).expect("armed");
        fired.push((client, count));
    }

    assert_eq!(mgr.check(50_000), 3);
    for (_client, count) in &fired {
        assert_eq!(count.get(), 1);
    }
}

#[test]
fn test_zero_and_negative_timeouts_do_not_arm() {
    let mgr = TimeoutManager::new();
    let (client, fired) = counting_client();

    assert!(mgr.register(&client, 0, 1_000).is_none());
    assert!(mgr.register(&client, -42, 1_000).is_none());
    assert_eq!(mgr.pending(), 0);
    assert_eq!(mgr.check(u64::MAX - 1), 0);
    assert_eq!(fired.get(), 0);
}

#[test]
fn test_unregister_disarms() {
    let mgr = TimeoutManager::new();
    let (client, fired) = counting_client();

    let handle = mgr.register(&client, 10_000, 0).expect("armed");
    mgr.unregister(&handle);
    assert!(!handle.borrow().is_armed());

    mgr.unregister(&handle); // already absent: no-op
    assert_eq!(mgr.check(1_000_000), 0);
    assert_eq!(fired.get(), 0);
}

#[test]
fn test_deadline_queries() {
    let mgr = TimeoutManager::new();
    assert_eq!(mgr.next_deadline_us(), u64::MAX);
    assert_eq!(mgr.us_left(123), u64::MAX);

    let (client, _fired) = counting_client();
    mgr.register(&client, 2_000, 10_000).expect("armed");
    assert_eq!(mgr.next_deadline_us(), 12_000);
    assert_eq!(mgr.us_left(10_500), 1_500);
    assert_eq!(mgr.us_left(50_000), 0, "past deadlines clamp to zero");
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum HookEvent {
    Set(u64),
    Clear,
}

struct RecordingHook {
    events: Rc<RefCell<Vec<HookEvent>>>,
}

impl DeadlineHook for RecordingHook {
    fn set_deadline(&mut self, abs_us: u64) {
        self.events.borrow_mut().push(HookEvent::Set(abs_us));
    }

    fn clear_deadline(&mut self) {
        self.events.borrow_mut().push(HookEvent::Clear);
    }
}

#[test]
fn test_hook_sees_minimum_changes_only() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let mgr = TimeoutManager::with_hook(Box::new(RecordingHook {
        events: events.clone(),
    }));

    let (client, _fired) = counting_client();
    let near = mgr.register(&client, 100, 0).expect("armed");
    // A later deadline does not move the minimum.
    let far = mgr.register(&client, 500, 0).expect("armed");
    assert_eq!(*events.borrow(), vec![HookEvent::Set(100)]);

    // Dropping the minimum re-arms to the next deadline.
    mgr.unregister(&near);
    assert_eq!(
        *events.borrow(),
        vec![HookEvent::Set(100), HookEvent::Set(500)]
    );

    mgr.unregister(&far);
    assert_eq!(
        *events.borrow(),
        vec![HookEvent::Set(100), HookEvent::Set(500), HookEvent::Clear]
    );
}

struct UnregisterInsideTimeout {
    mgr: TimeoutManager,
    handle: Option<ExpiryHandle>,
}

impl TimeoutClient for UnregisterInsideTimeout {
    fn timeout(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.mgr.unregister(&handle);
        }
    }
}

#[test]
#[should_panic(expected = "inside a timeout() callback")]
fn test_unregister_from_timeout_callback_is_a_program_error() {
    let mgr = TimeoutManager::new();
    let client = Rc::new(RefCell::new(UnregisterInsideTimeout {
        mgr: mgr.clone(),
        handle: None,
    }));
    let erased: Rc<RefCell<dyn TimeoutClient>> = client.clone();

    let handle = mgr.register(&erased, 1_000, 0).expect("armed");
    client.borrow_mut().handle = Some(handle);

    mgr.check(1_000);
}
