// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod reader;
pub mod ready;
pub mod sys;
pub mod writer;

pub use reader::{ConsumeOutcome, FiberReader};
pub use ready::{ReadyState, SharedReady};
pub use writer::FiberWriter;
