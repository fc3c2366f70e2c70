// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token cache persistence: load/save/remove a JSON file with atomic writes.

use std::path::Path;

use crate::credential::Credential;

/// Load a cached credential from a JSON file.
pub fn load(path: &Path) -> anyhow::Result<Credential> {
    let contents = std::fs::read_to_string(path)?;
    let cred: Credential = serde_json::from_str(&contents)?;
    if cred.access_token.is_empty() {
        anyhow::bail!("cached credential has an empty access token");
    }
    Ok(cred)
}

/// Save a credential to a JSON file atomically (write tmp + rename).
///
/// Uses a unique temp filename (PID + counter) so that concurrent saves from
/// the callback thread and a tool call never share a `.tmp` file.
pub fn save(path: &Path, cred: &Credential) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(cred)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Remove the cache file. A missing file is not an error.
///
/// Returns whether a file was actually removed.
pub fn remove(path: &Path) -> anyhow::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
