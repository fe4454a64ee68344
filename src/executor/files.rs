//! File probes and edits.
//!
//! Probes treat a missing file as "not satisfied" and any other I/O error
//! as an error, so a guard that cannot look at the file fails its step
//! instead of silently re-running it.

use crate::error::{ConvergeError, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Whether anything exists at the path.
pub fn exists(path: &Path) -> Result<bool> {
    Ok(path.try_exists()?)
}

/// Whether a directory exists at the path.
pub fn is_dir(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Read a file, mapping "not found" to `None`.
fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Whether any line of the file matches the regex.
pub fn contains_match(path: &Path, pattern: &Regex) -> Result<bool> {
    Ok(read_optional(path)?.is_some_and(|content| content.lines().any(|l| pattern.is_match(l))))
}

/// Whether the file's content equals `expected`.
pub fn content_equals(path: &Path, expected: &str) -> Result<bool> {
    Ok(read_optional(path)?.is_some_and(|content| content == expected))
}

/// Hex-encoded sha256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Whether the file exists and its sha256 equals `expected` (case-insensitive).
pub fn checksum_matches(path: &Path, expected: &str) -> Result<bool> {
    if !exists(path)? {
        return Ok(false);
    }
    Ok(sha256_file(path)?.eq_ignore_ascii_case(expected))
}

/// Whether the file was modified less than `max_age` ago.
///
/// Modification times in the future count as fresh.
pub fn modified_within(path: &Path, max_age: Duration) -> Result<bool> {
    let modified = match fs::metadata(path) {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    Ok(SystemTime::now()
        .duration_since(modified)
        .map_or(true, |age| age < max_age))
}

/// Whether every line matching `pattern` already equals its replacement.
///
/// A file without matching lines counts as replaced.
pub fn lines_replaced(path: &Path, pattern: &Regex, replacement: &str) -> Result<bool> {
    let Some(content) = read_optional(path)? else {
        return Ok(false);
    };
    Ok(content
        .lines()
        .filter(|line| pattern.is_match(line))
        .all(|line| pattern.replace_all(line, replacement) == line))
}

/// Rewrite every line matching `pattern`, returning how many lines changed.
///
/// The file is only written when something changed.
pub fn replace_lines(path: &Path, pattern: &Regex, replacement: &str) -> Result<usize> {
    let content = fs::read_to_string(path)?;
    let mut changed = 0;
    let mut output = String::with_capacity(content.len());

    for line in content.split_inclusive('\n') {
        let (body, ending) = match line.strip_suffix('\n') {
            Some(body) => (body, "\n"),
            None => (line, ""),
        };
        let replaced = pattern.replace_all(body, replacement);
        if replaced != body {
            changed += 1;
        }
        output.push_str(&replaced);
        output.push_str(ending);
    }

    if changed > 0 {
        fs::write(path, output)?;
    }
    Ok(changed)
}

/// Create a directory and its parents, then apply `mode` if given.
pub fn create_dir(path: &Path, mode: Option<u32>) -> Result<()> {
    fs::create_dir_all(path)?;
    if let Some(mode) = mode {
        set_mode(path, mode)?;
    }
    Ok(())
}

/// Write a file, creating parent directories, then apply `mode` if given.
pub fn write_file(path: &Path, content: &str, mode: Option<u32>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    if let Some(mode) = mode {
        set_mode(path, mode)?;
    }
    Ok(())
}

/// Remove a file. A missing file is not an error.
pub fn delete_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Parse an octal permission string such as `0755`.
pub fn parse_mode(mode: &str) -> Result<u32> {
    u32::from_str_radix(mode, 8)
        .ok()
        .filter(|m| *m <= 0o7777)
        .ok_or_else(|| ConvergeError::ConfigValidationError {
            message: format!("invalid octal mode '{}'", mode),
        })
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
