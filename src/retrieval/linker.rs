//! Cross-modal linking of `[Image: <id>]` markers to stored images
//!
//! Grammar: `"[Image:" id "]"`, where `id` is everything up to the next `]`
//! with surrounding whitespace removed. An unterminated marker matches nothing.

use super::ImageStore;
use crate::content::ImageId;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn marker_regex() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"\[Image:([^\]]*)\]").expect("marker pattern is valid"))
}

/// Every marker id in `text`, in order, duplicates included
pub fn parse_image_markers(text: &str) -> Vec<&str> {
    marker_regex()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|id| !id.is_empty())
        .collect()
}

/// Ids referenced by `text` that exist in `store`, in order of first occurrence.
///
/// Ids missing from the store are dropped silently.
pub fn resolve_references(text: &str, store: &ImageStore) -> Vec<ImageId> {
    let mut seen = HashSet::new();

    parse_image_markers(text)
        .into_iter()
        .map(ImageId::from)
        .filter(|id| store.contains(id))
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
