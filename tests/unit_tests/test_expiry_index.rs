// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use fiberio_rs::container::expiry_index::ExpiryIndex;

#[test]
fn test_orders_by_deadline() {
    let mut idx = ExpiryIndex::new();
    idx.insert(300, "late");
    idx.insert(100, "early");
    idx.insert(200, "middle");

    assert_eq!(idx.next_deadline_us(), Some(100));
    assert_eq!(idx.pop_expired(u64::MAX).map(|(_, v)| v), Some("early"));
    assert_eq!(idx.pop_expired(u64::MAX).map(|(_, v)| v), Some("middle"));
    assert_eq!(idx.pop_expired(u64::MAX).map(|(_, v)| v), Some("late"));
    assert!(idx.is_empty());
}

#[test]
fn test_equal_deadlines_keep_insertion_order() {
    let mut idx = ExpiryIndex::new();
    idx.insert(50, 1);
    idx.insert(50, 2);
    idx.insert(50, 3);
    assert_eq!(idx.len(), 3);

    assert_eq!(idx.pop_expired(50).map(|(_, v)| v), Some(1));
    assert_eq!(idx.pop_expired(50).map(|(_, v)| v), Some(2));
    assert_eq!(idx.pop_expired(50).map(|(_, v)| v), Some(3));
}

#[test]
fn test_pop_expired_respects_now() {
    let mut idx = ExpiryIndex::new();
    idx.insert(100, ());
    assert_eq!(idx.pop_expired(99), None);
    assert!(idx.pop_expired(100).is_some());
    assert_eq!(idx.pop_expired(u64::MAX), None);
}

#[test]
fn test_remove_by_key() {
    let mut idx = ExpiryIndex::new();
    let a = idx.insert(10, "a");
    let b = idx.insert(20, "b");

    assert_eq!(idx.remove(&a), Some("a"));
    assert_eq!(idx.remove(&a), None, "double remove is a no-op");
    assert_eq!(idx.next_deadline_us(), Some(20));
    assert_eq!(idx.remove(&b), Some("b"));
    assert_eq!(idx.next_deadline_us(), None);
}

#[test]
fn test_clear() {
    let mut idx = ExpiryIndex::new();
    idx.insert(1, ());
    idx.insert(2, ());
    idx.clear();
    assert!(idx.is_empty());
    assert_eq!(idx.next_deadline_us(), None);
}
