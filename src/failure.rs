// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The failure taxonomy shared by the dispatcher, the timeout manager and
//! the fiber I/O streams.
//!
//! A [`Failure`] crosses the suspension boundary explicitly: a fiber
//! primitive returns it to the task, the task returns it to its driving
//! select-client, and the dispatcher routes it to the client's error hook.
//! Two of the variants are *warnings* (the peer ended the interaction
//! without anything going wrong locally); the rest are genuine errors.

use std::io;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Failure {
    /// The peer shut down the stream in an orderly fashion (read returned
    /// zero bytes without an error or hangup condition pending).
    #[error("end of flow: peer closed the stream")]
    EndOfFlow,

    /// The peer dropped the connection (hangup reported by the readiness
    /// notifier, or a reset observed by a syscall).
    #[error("connection hung up by peer")]
    RemoteHangup,

    /// A local or kernel-reported I/O error, carrying the captured errno.
    #[error("I/O error while {context}: errno {errno}")]
    Io {
        errno: i32,
        context: &'static str,
    },

    /// A deadline registered with the timeout manager expired while the
    /// task was suspended.
    #[error("deadline expired")]
    Timeout,

    /// A higher layer rejected the byte stream (raised through the
    /// reader's consumer delegate or by protocol glue).
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl Failure {
    /// Wraps an [`io::Error`], keeping the errno and a short context tag.
    pub fn io(err: &io::Error, context: &'static str) -> Self {
        Failure::Io {
            errno: err.raw_os_error().unwrap_or(0),
            context,
        }
    }

    /// Captures `errno` of the calling thread.
    pub fn last_os(context: &'static str) -> Self {
        Failure::io(&io::Error::last_os_error(), context)
    }

    /// Warnings describe the peer ending the interaction; everything else
    /// is an error in the strict sense.
    pub fn is_warning(&self) -> bool {
        matches!(self, Failure::EndOfFlow | Failure::RemoteHangup)
    }

    pub fn errno(&self) -> Option<i32> {
        match self {
            Failure::Io { errno, .. } => Some(*errno),
            _ => None,
        }
    }
}
