//! Minimal text patches.
//!
//! A patch is the smallest single-region splice that turns one string
//! into another: excise `deleted` characters at `offset`, insert
//! `inserted` in their place. Full passage text never crosses the wire;
//! only patches do.
//!
//! Offsets and counts are in Unicode scalar values, not bytes, so a
//! patch computed on one replica applies on any other regardless of how
//! the text is encoded locally.

use serde::{Deserialize, Serialize};

/// One contiguous text edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPatch {
    /// Character offset where the edit begins.
    pub offset: usize,
    /// Number of characters removed at `offset`.
    pub deleted: usize,
    /// Text spliced in at `offset`.
    pub inserted: String,
}

impl TextPatch {
    /// A patch that leaves the text untouched.
    pub fn is_noop(&self) -> bool {
        self.deleted == 0 && self.inserted.is_empty()
    }
}

/// Compute the minimal patch turning `old` into `new`.
///
/// Trims the longest common prefix, then the longest common suffix of
/// what remains; the patch is anchored at the prefix length. Satisfies
/// `apply(old, &diff(old, new)) == new` for all inputs.
pub fn diff(old: &str, new: &str) -> TextPatch {
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();

    let mut prefix = 0;
    while prefix < old_chars.len()
        && prefix < new_chars.len()
        && old_chars[prefix] == new_chars[prefix]
    {
        prefix += 1;
    }

    let mut suffix = 0;
    while suffix < old_chars.len() - prefix
        && suffix < new_chars.len() - prefix
        && old_chars[old_chars.len() - 1 - suffix] == new_chars[new_chars.len() - 1 - suffix]
    {
        suffix += 1;
    }

    TextPatch {
        offset: prefix,
        deleted: old_chars.len() - prefix - suffix,
        inserted: new_chars[prefix..new_chars.len() - suffix].iter().collect(),
    }
}

/// Apply a patch to `text`.
///
/// Applied against the receiver's *current* text, never re-derived.
/// Out-of-range offsets clamp to the end of the text rather than
/// erroring: replicas can transiently race, and a clamped splice keeps
/// the store usable until the next authoritative update.
pub fn apply(text: &str, patch: &TextPatch) -> String {
    let chars: Vec<char> = text.chars().collect();
    let start = patch.offset.min(chars.len());
    let end = (start + patch.deleted).min(chars.len());

    let mut out = String::with_capacity(text.len() + patch.inserted.len());
    out.extend(&chars[..start]);
    out.push_str(&patch.inserted);
    out.extend(&chars[end..]);
    out
}
