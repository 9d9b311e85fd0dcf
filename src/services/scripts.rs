// Script catalogue: the worker scripts offered in the picker.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

pub const SCRIPT_EXTENSION: &str = "py";

/// Worker scripts directly inside `dir`, sorted by file name.
///
/// A missing directory is an empty catalogue, not an error.
pub fn list_scripts(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    if !dir.is_dir() {
        tracing::debug!("Scripts directory {} not found", dir);
        return Ok(Vec::new());
    }

    let mut scripts = Vec::new();
    for entry in dir
        .read_dir_utf8()
        .with_context(|| format!("Failed to read scripts directory: {}", dir))?
    {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", dir))?;
        let path = entry.path();
        let is_script = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(SCRIPT_EXTENSION));
        if is_script && fs::metadata(path).map(|m| m.is_file()).unwrap_or(false) {
            scripts.push(path.to_path_buf());
        }
    }

    scripts.sort_by_key(|path| path.file_name().map(str::to_lowercase));
    Ok(scripts)
}

/// Display name for a script: the stem with `_`/`-` runs turned into single spaces.
pub fn friendly_label(path: &Utf8Path) -> String {
    let stem = path.file_stem().unwrap_or_else(|| path.as_str());
    stem.split(['_', '-', ' '])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
