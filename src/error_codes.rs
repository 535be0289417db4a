//! Name and description tables for S7 header error classes and item
//! return codes.
//!
//! The tables are loaded once from the embedded `error_codes.toml`. Lookups
//! fall back to `None` for codes the table does not cover; callers format
//! those numerically.

use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Deserialize)]
struct RawEntry {
    code: u32,
    name: String,
    description: Option<String>,
}

#[derive(Deserialize)]
struct RawFile {
    #[serde(default)]
    classes: Vec<RawEntry>,
    #[serde(default)]
    returns: Vec<RawEntry>,
}

#[derive(Clone, Debug)]
pub struct CodeEntry {
    pub name: &'static str,
    pub description: Option<&'static str>,
}

fn build_map(entries: &[RawEntry]) -> HashMap<u8, CodeEntry> {
    let mut m = HashMap::with_capacity(entries.len());
    for e in entries {
        let code = match u8::try_from(e.code) {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    "warning: code out of range in error_codes.toml for {}: {}",
                    e.name,
                    e.code
                );
                continue;
            }
        };
        let name: &'static str = Box::leak(e.name.clone().into_boxed_str());
        let description = e
            .description
            .clone()
            .map(|d| -> &'static str { Box::leak(d.into_boxed_str()) });
        m.insert(code, CodeEntry { name, description });
    }
    m
}

static TABLES: Lazy<(HashMap<u8, CodeEntry>, HashMap<u8, CodeEntry>)> = Lazy::new(|| {
    let s = include_str!("./error_codes.toml");
    let rf: RawFile = match toml::from_str(s) {
        Ok(rf) => rf,
        Err(e) => {
            tracing::warn!("warning: failed to parse error_codes.toml at compile time: {}", e);
            return (HashMap::new(), HashMap::new());
        }
    };
    (build_map(&rf.classes), build_map(&rf.returns))
});

/// Short name for an S7 header error class (e.g. "Access" for 0x87).
#[must_use]
pub fn error_class_name(code: u8) -> Option<&'static str> {
    TABLES.0.get(&code).map(|e| e.name)
}

/// Description for an S7 header error class.
#[must_use]
pub fn error_class_description(code: u8) -> Option<&'static str> {
    TABLES.0.get(&code).and_then(|e| e.description)
}

/// Short name for a per-item return code (e.g. "ObjectDoesNotExist" for 0x0A).
#[must_use]
pub fn return_code_name(code: u8) -> Option<&'static str> {
    TABLES.1.get(&code).map(|e| e.name)
}

/// Description for a per-item return code.
#[must_use]
pub fn return_code_description(code: u8) -> Option<&'static str> {
    TABLES.1.get(&code).and_then(|e| e.description)
}
