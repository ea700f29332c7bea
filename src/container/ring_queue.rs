// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Fixed-capacity byte FIFO over one contiguous buffer.
//!
//! Every item is stored as a little-endian `u32` length header followed by
//! the payload, and never straddles the end of the buffer: when an item
//! does not fit before `capacity`, the writer records the wrap anchor
//! (`gap`) and restarts at offset zero. The reader wraps at the same
//! anchor, so payloads always come back as one contiguous slice.

use bytes::Bytes;

/// Bytes of the per-item length header.
pub const LEN_HEADER: usize = size_of::<u32>();

/// Cursor tuple handed to external persistence layers; restoring the
/// buffer and these four fields byte-for-byte restores the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingCursors {
    pub gap: usize,
    pub write_to: usize,
    pub read_from: usize,
    pub item_count: usize,
}

#[derive(Debug)]
pub struct RingQueue {
    buf: Box<[u8]>,
    /// Offset of the next item to pop.
    read_from: usize,
    /// Offset the next pushed item starts at.
    write_to: usize,
    /// Wrap anchor: first offset past the last valid item before the
    /// writer wrapped. Equals `capacity` while the layout is linear.
    gap: usize,
    items: usize,
    used: usize,
}

impl RingQueue {
    /// A queue with room for `capacity` bytes of headers plus payloads.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity > LEN_HEADER,
            "ring queue capacity {capacity} cannot hold a single item"
        );
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read_from: 0,
            write_to: 0,
            gap: capacity,
            items: 0,
            used: 0,
        }
    }

    /// Total bytes an item of `payload_len` occupies, header included.
    pub fn push_size(payload_len: usize) -> usize {
        LEN_HEADER + payload_len
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// Bytes occupied by stored items (headers included, wrap waste not
    /// counted).
    pub fn used_space(&self) -> usize {
        self.used
    }

    pub fn free_space(&self) -> usize {
        self.capacity() - self.used
    }

    /// Appends `payload` if it fits; empty payloads and payloads that do
    /// not fit are rejected without touching the queue.
    pub fn push(&mut self, payload: &[u8]) -> bool {
        if payload.is_empty() {
            return false;
        }
        let need = Self::push_size(payload.len());
        if !self.will_fit(need) {
            return false;
        }

        if self.write_to + need > self.capacity() {
            // Anchor the reader's wrap point and restart at the front.
            self.gap = self.write_to;
            self.write_to = 0;
        }

        let at = self.write_to;
        let len = payload.len() as u32;
        self.buf[at..at + LEN_HEADER].copy_from_slice(&len.to_le_bytes());
        self.buf[at + LEN_HEADER..at + need].copy_from_slice(payload);
        self.write_to = at + need;
        self.items += 1;
        self.used += need;
        true
    }

    /// Removes and returns the oldest payload.
    pub fn pop(&mut self) -> Option<Bytes> {
        if self.items == 0 {
            return None;
        }
        if self.read_from >= self.gap {
            // The writer wrapped before this item; follow it.
            self.read_from = 0;
            self.gap = self.capacity();
        }

        let at = self.read_from;
        let mut len_bytes = [0u8; LEN_HEADER];
        len_bytes.copy_from_slice(&self.buf[at..at + LEN_HEADER]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        let payload =
            Bytes::copy_from_slice(&self.buf[at + LEN_HEADER..at + LEN_HEADER + len]);

        let need = Self::push_size(len);
        self.read_from = at + need;
        self.items -= 1;
        self.used -= need;
        if self.items == 0 {
            self.reset_cursors();
        }
        Some(payload)
    }

    pub fn clear(&mut self) {
        self.items = 0;
        self.used = 0;
        self.reset_cursors();
    }

    /// Cursor tuple for external persistence.
    pub fn cursors(&self) -> RingCursors {
        RingCursors {
            gap: self.gap,
            write_to: self.write_to,
            read_from: self.read_from,
            item_count: self.items,
        }
    }

    /// Raw storage for external persistence.
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    fn reset_cursors(&mut self) {
        self.read_from = 0;
        self.write_to = 0;
        self.gap = self.capacity();
    }

    fn will_fit(&self, need: usize) -> bool {
        if self.items == 0 {
            // Cursors are at zero whenever the queue is empty.
            need <= self.capacity()
        } else if self.read_from < self.write_to {
            // Linear layout: free space runs to the end, plus the front
            // up to the reader if the item has to wrap.
            self.write_to + need <= self.capacity() || need <= self.read_from
        } else {
            // Writer already wrapped: only the span up to the reader is
            // free. `read_from == write_to` with items present means full.
            need <= self.read_from - self.write_to
        }
    }
}
