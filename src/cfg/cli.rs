// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Resolves the runtime config location: the `FIBERIO_CONFIG`
/// environment variable wins over `fallback`, relative paths are
/// anchored at the current working directory, and the result must
/// exist.
pub fn resolve_config_path(fallback: &str) -> Result<PathBuf> {
    let candidate = std::env::var("FIBERIO_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(fallback));

    let abs = if candidate.is_absolute() {
        candidate
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(candidate)
    };

    let canon = abs
        .canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))?;

    Ok(canon)
}

/// Path of a secondary file (e.g. the logger config) sitting next to
/// the main config.
pub fn sibling_path(config_path: &Path, file_name: &str) -> PathBuf {
    config_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(file_name)
}
