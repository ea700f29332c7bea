// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod bucket_info;
pub mod expiry_index;
pub mod ring_queue;
