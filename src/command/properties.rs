// src/command/properties.rs

//! Key/value properties files attached to stop commands.
//!
//! ```text
//! # comment
//! ! also a comment
//! reason = superseded
//! requested.by: ops
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::Result;
use crate::fs::FileSystem;

pub fn load_properties(fs: &dyn FileSystem, path: &Path) -> Result<BTreeMap<String, String>> {
    let text = fs.read_to_string(path)?;
    Ok(parse_properties(&text))
}

/// Parse `key=value` / `key: value` lines. The first `=` or `:` separates
/// key from value; a line without one is a key with an empty value. Later
/// duplicates win.
pub fn parse_properties(text: &str) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let (key, value) = match line.find(['=', ':']) {
            Some(at) => (&line[..at], &line[at + 1..]),
            None => (line, ""),
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        properties.insert(key.to_string(), value.trim().to_string());
    }
    properties
}

