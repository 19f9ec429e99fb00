//! The story/passage data model.
//!
//! A story is a named graph of passages plus presentation metadata. It
//! is the unit of locking and of network topics: one lock, one channel
//! per story. Passages are positioned text nodes owned exclusively by
//! their story.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skein_layout::Rect;
use uuid::Uuid;

/// Derive a story's id deterministically from its name, so every
/// replica that learns of a story by name computes the same id.
pub fn story_id_for(name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

/// A positioned text node within a story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: Uuid,
    /// Owning story id. A back-reference, not ownership.
    pub story: Uuid,
    pub name: String,
    pub text: String,
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
    /// Set semantics: order irrelevant, no duplicates.
    pub tags: Vec<String>,
    /// Ephemeral UI state, replicated so other sessions can render
    /// remote selections.
    pub selected: bool,
}

impl Passage {
    pub fn rect(&self) -> Rect {
        Rect::new(self.left, self.top, self.width, self.height)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Idempotent: inserting an existing tag is a no-op.
    pub fn add_tag(&mut self, tag: &str) {
        if !self.has_tag(tag) {
            self.tags.push(tag.to_owned());
        }
    }

    /// Removes all occurrences.
    pub fn remove_tag(&mut self, tag: &str) {
        self.tags.retain(|t| t != tag);
    }
}

/// A named graph of passages; the unit of locking and replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: Uuid,
    pub name: String,
    /// Interchange format id, random per story copy.
    pub ifid: String,
    pub passages: Vec<Passage>,
    /// Tag name → display color.
    pub tag_colors: HashMap<String, String>,
    /// Lease id when this session holds the write lock.
    pub lock_id: Option<String>,
    /// When another session's lock expires, from the story listing.
    pub lock_expiry: Option<DateTime<Utc>>,
    /// This story accepts no local mutations; the editor refuses them
    /// even when the session holds the write lock.
    pub read_only: bool,
    pub start_passage: Option<Uuid>,
    pub snap_to_grid: bool,
    pub zoom: f64,
    pub last_update: DateTime<Utc>,
}

impl Story {
    pub fn passage(&self, id: Uuid) -> Option<&Passage> {
        self.passages.iter().find(|p| p.id == id)
    }

    pub fn passage_mut(&mut self, id: Uuid) -> Option<&mut Passage> {
        self.passages.iter_mut().find(|p| p.id == id)
    }

    /// First match in story order. Name uniqueness is enforced at
    /// creation, so this is unambiguous except under concurrent renames,
    /// which the write lock serializes anyway.
    pub fn passage_by_name(&self, name: &str) -> Option<&Passage> {
        self.passages.iter().find(|p| p.name == name)
    }

    pub fn passage_by_name_mut(&mut self, name: &str) -> Option<&mut Passage> {
        self.passages.iter_mut().find(|p| p.name == name)
    }

    /// Whether another session's lease is still live at `now`.
    pub fn is_locked_out(&self, now: DateTime<Utc>) -> bool {
        match self.lock_expiry {
            Some(expiry) => now < expiry,
            None => false,
        }
    }

    pub fn tags_in_use(&self) -> HashSet<&str> {
        self.passages
            .iter()
            .flat_map(|p| p.tags.iter().map(String::as_str))
            .collect()
    }
}
