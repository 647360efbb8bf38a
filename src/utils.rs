//! Utility functions shared by the reader, the codec and the driver.
//!

use crate::error::{Error, Result};
use glob::glob;
use std::path::PathBuf;

/// Parse a one-character group code such as a return flag.
///
/// Surrounding whitespace is ignored; anything other than exactly one
/// remaining character is rejected.
pub fn parse_code(column: &'static str, s: &str) -> Result<char> {
    let mut chars = s.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(Error::InvalidGroupCode {
            column,
            code: s.to_string(),
        }),
    }
}

/// Expand a glob pattern into a sorted list of files.
///
/// Unreadable entries are skipped, matching how shard listings are
/// treated everywhere else.
pub fn expand_inputs(pattern: &str) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = glob(pattern)?
        .flatten()
        .filter(|p| p.is_file())
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}
