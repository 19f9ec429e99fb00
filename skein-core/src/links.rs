//! Link target extraction from passage text.
//!
//! Passages reference each other with double-bracket links. All four
//! syntaxes resolve to a target passage name:
//!
//! ```text
//! [[Target]]
//! [[label|Target]]
//! [[label->Target]]
//! [[Target<-label]]
//! ```
//!
//! A trailing `][setter]` section is ignored. Targets are trimmed and
//! deduplicated, preserving order of first appearance. When a passage
//! is renamed, [`rewrite_targets`] redirects links in the same four
//! forms to the new name.

use std::sync::LazyLock;

use regex::Regex;

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[(.*?)\]\]").expect("link regex"));

fn target(raw: &str) -> &str {
    // Drop any setter section first.
    let raw = raw.split("][").next().unwrap_or(raw);

    if let Some(idx) = raw.find("->") {
        &raw[idx + 2..]
    } else if let Some(idx) = raw.find("<-") {
        &raw[..idx]
    } else if let Some(idx) = raw.rfind('|') {
        &raw[idx + 1..]
    } else {
        raw
    }
}

/// All link targets in `text`, in order of first appearance.
pub fn links(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for capture in LINK_RE.captures_iter(text) {
        let name = target(&capture[1]).trim();
        if !name.is_empty() && !seen.iter().any(|s| s == name) {
            seen.push(name.to_owned());
        }
    }
    seen
}

/// Targets linked from `new_text` that `old_text` did not link to.
///
/// The caller filters out names that already exist as passages; this
/// function only diffs the link sets.
pub fn new_links(old_text: &str, new_text: &str) -> Vec<String> {
    let old = links(old_text);
    links(new_text)
        .into_iter()
        .filter(|name| !old.contains(name))
        .collect()
}

/// Rewrite every link targeting `old` to target `new` instead,
/// preserving labels, arrow direction, and setter sections. Returns
/// `None` when no link matched.
pub fn rewrite_targets(text: &str, old: &str, new: &str) -> Option<String> {
    let mut changed = false;
    let rewritten = LINK_RE.replace_all(text, |caps: &regex::Captures| {
        match rewrite_inner(&caps[1], old, new) {
            Some(inner) => {
                changed = true;
                format!("[[{inner}]]")
            }
            None => caps[0].to_owned(),
        }
    });
    changed.then(|| rewritten.into_owned())
}

fn rewrite_inner(inner: &str, old: &str, new: &str) -> Option<String> {
    let (link, setter) = match inner.find("][") {
        Some(idx) => (&inner[..idx], &inner[idx..]),
        None => (inner, ""),
    };

    let rebuilt = if let Some(idx) = link.find("->") {
        (link[idx + 2..].trim() == old).then(|| format!("{}->{new}", &link[..idx]))
    } else if let Some(idx) = link.find("<-") {
        (link[..idx].trim() == old).then(|| format!("{new}<-{}", &link[idx + 2..]))
    } else if let Some(idx) = link.rfind('|') {
        (link[idx + 1..].trim() == old).then(|| format!("{}|{new}", &link[..idx]))
    } else {
        (link.trim() == old).then(|| new.to_owned())
    };
    rebuilt.map(|s| format!("{s}{setter}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_link() {
        assert_eq!(links("Go [[North]]."), vec!["North"]);
    }

    #[test]
    fn test_labelled_pipe_link() {
        assert_eq!(links("[[head north|North]]"), vec!["North"]);
    }

    #[test]
    fn test_arrow_link() {
        assert_eq!(links("[[head north->North]]"), vec!["North"]);
    }

    #[test]
    fn test_reverse_arrow_link() {
        assert_eq!(links("[[North<-head north]]"), vec!["North"]);
    }

    #[test]
    fn test_setter_section_ignored() {
        assert_eq!(links("[[North][$visited = true]]"), vec!["North"]);
    }

    #[test]
    fn test_multiple_links_in_order() {
        let text = "Choose: [[North]], [[South]], or back [[North]].";
        assert_eq!(links(text), vec!["North", "South"]);
    }

    #[test]
    fn test_no_links() {
        assert!(links("Plain text, no [brackets] of note.").is_empty());
    }

    #[test]
    fn test_whitespace_trimmed() {
        assert_eq!(links("[[ North ]]"), vec!["North"]);
    }

    #[test]
    fn test_new_links_diff() {
        let old = "Go [[North]].";
        let new = "Go [[North]] or [[South]] or [[East]].";
        assert_eq!(new_links(old, new), vec!["South", "East"]);
    }

    #[test]
    fn test_new_links_none_when_removed() {
        let old = "Go [[North]] or [[South]].";
        let new = "Go [[North]].";
        assert!(new_links(old, new).is_empty());
    }

    #[test]
    fn test_rewrite_simple_link() {
        assert_eq!(
            rewrite_targets("Go [[North]].", "North", "Up").as_deref(),
            Some("Go [[Up]].")
        );
    }

    #[test]
    fn test_rewrite_labelled_forms_keep_labels() {
        assert_eq!(
            rewrite_targets("[[head north|North]]", "North", "Up").as_deref(),
            Some("[[head north|Up]]")
        );
        assert_eq!(
            rewrite_targets("[[head north->North]]", "North", "Up").as_deref(),
            Some("[[head north->Up]]")
        );
        assert_eq!(
            rewrite_targets("[[North<-head north]]", "North", "Up").as_deref(),
            Some("[[Up<-head north]]")
        );
    }

    #[test]
    fn test_rewrite_keeps_setter_section() {
        assert_eq!(
            rewrite_targets("[[North][$visited = true]]", "North", "Up").as_deref(),
            Some("[[Up][$visited = true]]")
        );
    }

    #[test]
    fn test_rewrite_touches_only_matching_targets() {
        let text = "Go [[North]] or [[South]], maybe [[north]].";
        assert_eq!(
            rewrite_targets(text, "North", "Up").as_deref(),
            Some("Go [[Up]] or [[South]], maybe [[north]].")
        );
    }

    #[test]
    fn test_rewrite_none_when_nothing_matches() {
        assert_eq!(rewrite_targets("Go [[South]].", "North", "Up"), None);
        assert_eq!(rewrite_targets("No links at all.", "North", "Up"), None);
    }

    #[test]
    fn test_rewrite_label_mentioning_target_is_untouched() {
        // Only the target half of a labelled link is rewritten.
        assert_eq!(
            rewrite_targets("[[North|South]]", "North", "Up"),
            None
        );
    }
}
