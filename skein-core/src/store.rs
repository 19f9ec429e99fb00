//! The replica store: one owned aggregate every mutation flows through.
//!
//! Local edits and decoded remote actions are applied through the same
//! methods, so clamping, start-passage designation, and `last_update`
//! stamping behave identically on every replica. The store is mutated
//! from a single logical thread of control; write access to the wire is
//! gated elsewhere (the lock session), not here.
//!
//! Lookup misses are errors at this boundary: a missing story or
//! passage id means a local bug. Remote messages that may legitimately
//! race (stale passage names) are tolerated by the caller, which maps
//! the error to a logged drop.

use chrono::Utc;
use serde_json::Value;
use skein_layout::{resolve_position, Rect};
use thiserror::Error;
use uuid::Uuid;

use crate::links;
use crate::patch::{self, TextPatch};
use crate::story::{story_id_for, Passage, Story};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no story exists with id {0}")]
    StoryNotFound(Uuid),
    #[error("no story named {0:?}")]
    StoryNameNotFound(String),
    #[error("no passage exists in this story with id {0}")]
    PassageNotFound(Uuid),
    #[error("no passage named {0:?} in story {1:?}")]
    PassageNameNotFound(String, String),
    #[error("a story named {0:?} already exists")]
    DuplicateStoryName(String),
    #[error("a passage named {0:?} already exists in this story")]
    DuplicatePassageName(String),
    #[error(transparent)]
    Layout(#[from] skein_layout::LayoutError),
    #[error("snapshot decode failed: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Properties for a new story. Everything but the name has a default.
#[derive(Debug, Clone, Default)]
pub struct StoryProps {
    pub name: String,
    pub snap_to_grid: bool,
    pub read_only: bool,
    pub zoom: Option<f64>,
}

/// Properties for a new passage.
#[derive(Debug, Clone)]
pub struct PassageProps {
    pub name: String,
    pub left: f64,
    pub top: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub text: Option<String>,
    pub tags: Vec<String>,
}

impl PassageProps {
    pub fn at(name: impl Into<String>, left: f64, top: f64) -> Self {
        Self {
            name: name.into(),
            left,
            top,
            width: None,
            height: None,
            text: None,
            tags: Vec::new(),
        }
    }
}

/// A partial passage update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct PassageUpdate {
    pub name: Option<String>,
    pub left: Option<f64>,
    pub top: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    /// Replaces the whole text. Local edits use this; the wire carries
    /// a patch instead.
    pub text: Option<String>,
    /// Applied against the passage's current text.
    pub patch: Option<TextPatch>,
    /// Replaces the whole tag set.
    pub tags: Option<Vec<String>>,
    pub selected: Option<bool>,
}

const DEFAULT_PASSAGE_SIZE: f64 = 100.0;

/// Keep passages on screen: coordinates are clamped to >= 0 on every
/// write, substituting the previous value when the supplied one is not
/// a usable number.
fn clamp_coord(value: Option<f64>, previous: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v.max(0.0),
        _ => previous.max(0.0),
    }
}

/// The canonical in-memory story graph.
#[derive(Debug, Default)]
pub struct StoryStore {
    stories: Vec<Story>,
}

impl StoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ───────────────────── lookups ─────────────────────

    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    pub fn story(&self, id: Uuid) -> Result<&Story, StoreError> {
        self.stories
            .iter()
            .find(|s| s.id == id)
            .ok_or(StoreError::StoryNotFound(id))
    }

    fn story_mut(&mut self, id: Uuid) -> Result<&mut Story, StoreError> {
        self.stories
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::StoryNotFound(id))
    }

    pub fn story_by_name(&self, name: &str) -> Result<&Story, StoreError> {
        self.stories
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| StoreError::StoryNameNotFound(name.to_owned()))
    }

    fn story_by_name_mut(&mut self, name: &str) -> Result<&mut Story, StoreError> {
        self.stories
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| StoreError::StoryNameNotFound(name.to_owned()))
    }

    // ───────────────────── story lifecycle ─────────────────────

    pub fn create_story(&mut self, props: StoryProps) -> Result<Uuid, StoreError> {
        if self.stories.iter().any(|s| s.name == props.name) {
            return Err(StoreError::DuplicateStoryName(props.name));
        }

        let story = Story {
            id: story_id_for(&props.name),
            name: props.name,
            ifid: Uuid::new_v4().to_string().to_uppercase(),
            passages: Vec::new(),
            tag_colors: Default::default(),
            lock_id: None,
            lock_expiry: None,
            read_only: props.read_only,
            start_passage: None,
            snap_to_grid: props.snap_to_grid,
            zoom: props.zoom.unwrap_or(1.0),
            last_update: Utc::now(),
        };
        let id = story.id;
        self.stories.push(story);
        Ok(id)
    }

    pub fn rename_story(&mut self, id: Uuid, new_name: &str) -> Result<(), StoreError> {
        if self
            .stories
            .iter()
            .any(|s| s.id != id && s.name == new_name)
        {
            return Err(StoreError::DuplicateStoryName(new_name.to_owned()));
        }
        let story = self.story_mut(id)?;
        story.name = new_name.to_owned();
        story.last_update = Utc::now();
        Ok(())
    }

    /// Deleting a story deletes all of its passages with it.
    pub fn delete_story(&mut self, id: Uuid) -> Result<(), StoreError> {
        let before = self.stories.len();
        self.stories.retain(|s| s.id != id);
        if self.stories.len() == before {
            return Err(StoreError::StoryNotFound(id));
        }
        Ok(())
    }

    pub fn delete_story_by_name(&mut self, name: &str) -> Result<(), StoreError> {
        let id = self.story_by_name(name)?.id;
        self.delete_story(id)
    }

    /// Deep copy under a new name: fresh story and passage ids, start
    /// passage remapped onto its copy.
    pub fn duplicate_story(&mut self, id: Uuid, new_name: &str) -> Result<Uuid, StoreError> {
        if self.stories.iter().any(|s| s.name == new_name) {
            return Err(StoreError::DuplicateStoryName(new_name.to_owned()));
        }

        let original = self.story(id)?;
        let mut copy = original.clone();
        copy.id = story_id_for(new_name);
        copy.name = new_name.to_owned();
        copy.ifid = Uuid::new_v4().to_string().to_uppercase();
        copy.lock_id = None;
        copy.lock_expiry = None;
        copy.last_update = Utc::now();

        for passage in &mut copy.passages {
            let new_id = Uuid::new_v4();
            if original.start_passage == Some(passage.id) {
                copy.start_passage = Some(new_id);
            }
            passage.id = new_id;
            passage.story = copy.id;
        }

        let new_id = copy.id;
        self.stories.push(copy);
        Ok(new_id)
    }

    pub fn set_snap_to_grid(&mut self, id: Uuid, snap: bool) -> Result<(), StoreError> {
        let story = self.story_mut(id)?;
        story.snap_to_grid = snap;
        story.last_update = Utc::now();
        Ok(())
    }

    pub fn set_zoom(&mut self, id: Uuid, zoom: f64) -> Result<(), StoreError> {
        let story = self.story_mut(id)?;
        story.zoom = zoom;
        story.last_update = Utc::now();
        Ok(())
    }

    // ───────────────────── story fields ─────────────────────

    pub fn set_tag_color(
        &mut self,
        story_id: Uuid,
        tag: &str,
        color: &str,
    ) -> Result<(), StoreError> {
        let story = self.story_mut(story_id)?;
        story.tag_colors.insert(tag.to_owned(), color.to_owned());
        story.last_update = Utc::now();
        Ok(())
    }

    pub fn set_start_passage(
        &mut self,
        story_id: Uuid,
        passage_id: Uuid,
    ) -> Result<(), StoreError> {
        let story = self.story_mut(story_id)?;
        if story.passage(passage_id).is_none() {
            return Err(StoreError::PassageNotFound(passage_id));
        }
        story.start_passage = Some(passage_id);
        story.last_update = Utc::now();
        Ok(())
    }

    /// Drop colors for tags no passage uses any more. Invoked
    /// opportunistically, not on every tag removal.
    pub fn clean_up_tag_colors(&mut self, story_id: Uuid) -> Result<(), StoreError> {
        let story = self.story_mut(story_id)?;
        let used: Vec<String> = story
            .tags_in_use()
            .into_iter()
            .map(str::to_owned)
            .collect();
        let before = story.tag_colors.len();
        story.tag_colors.retain(|tag, _| used.iter().any(|u| u == tag));
        if story.tag_colors.len() != before {
            story.last_update = Utc::now();
        }
        Ok(())
    }

    // ───────────────────── passage lifecycle ─────────────────────

    pub fn create_passage(
        &mut self,
        story_id: Uuid,
        props: PassageProps,
    ) -> Result<Uuid, StoreError> {
        let story = self.story_mut(story_id)?;
        if story.passage_by_name(&props.name).is_some() {
            return Err(StoreError::DuplicatePassageName(props.name));
        }

        let passage = Passage {
            id: Uuid::new_v4(),
            story: story_id,
            name: props.name,
            text: props.text.unwrap_or_default(),
            left: clamp_coord(Some(props.left), 0.0),
            top: clamp_coord(Some(props.top), 0.0),
            width: props.width.unwrap_or(DEFAULT_PASSAGE_SIZE),
            height: props.height.unwrap_or(DEFAULT_PASSAGE_SIZE),
            tags: props.tags,
            selected: false,
        };
        let id = passage.id;
        story.passages.push(passage);

        // The first passage in an empty story becomes the start.
        if story.passages.len() == 1 {
            story.start_passage = Some(id);
        }
        story.last_update = Utc::now();
        Ok(id)
    }

    pub fn update_passage(
        &mut self,
        story_id: Uuid,
        passage_id: Uuid,
        update: PassageUpdate,
    ) -> Result<(), StoreError> {
        let story = self.story_mut(story_id)?;
        let passage = story
            .passage_mut(passage_id)
            .ok_or(StoreError::PassageNotFound(passage_id))?;

        apply_update(passage, update);
        story.last_update = Utc::now();
        Ok(())
    }

    /// Name-addressed update, used by the remote apply path where wire
    /// actions identify passages by name.
    pub fn update_passage_by_name(
        &mut self,
        story_id: Uuid,
        passage_name: &str,
        update: PassageUpdate,
    ) -> Result<(), StoreError> {
        let story = self.story_mut(story_id)?;
        let name = story.name.clone();
        let passage = story.passage_by_name_mut(passage_name).ok_or_else(|| {
            StoreError::PassageNameNotFound(passage_name.to_owned(), name)
        })?;

        apply_update(passage, update);
        story.last_update = Utc::now();
        Ok(())
    }

    pub fn delete_passage(
        &mut self,
        story_id: Uuid,
        passage_id: Uuid,
    ) -> Result<(), StoreError> {
        let story = self.story_mut(story_id)?;
        let before = story.passages.len();
        story.passages.retain(|p| p.id != passage_id);
        if story.passages.len() == before {
            return Err(StoreError::PassageNotFound(passage_id));
        }

        // Keep the start-passage invariant: a story with passages always
        // has one designated.
        if story.start_passage == Some(passage_id) {
            story.start_passage = story.passages.first().map(|p| p.id);
        }
        story.last_update = Utc::now();
        Ok(())
    }

    /// Redirect `[[links]]` across the whole story after a passage
    /// rename. Returns one `(passage_name, patch)` per passage whose
    /// text changed, for the caller to put on the wire.
    pub fn change_links(
        &mut self,
        story_id: Uuid,
        old_name: &str,
        new_name: &str,
    ) -> Result<Vec<(String, TextPatch)>, StoreError> {
        let story = self.story_mut(story_id)?;
        let mut patches = Vec::new();
        for passage in &mut story.passages {
            if let Some(rewritten) = links::rewrite_targets(&passage.text, old_name, new_name) {
                patches.push((passage.name.clone(), patch::diff(&passage.text, &rewritten)));
                passage.text = rewritten;
            }
        }
        if !patches.is_empty() {
            story.last_update = Utc::now();
        }
        Ok(patches)
    }

    pub fn delete_passage_by_name(
        &mut self,
        story_id: Uuid,
        passage_name: &str,
    ) -> Result<(), StoreError> {
        let story = self.story(story_id)?;
        let id = story
            .passage_by_name(passage_name)
            .ok_or_else(|| {
                StoreError::PassageNameNotFound(passage_name.to_owned(), story.name.clone())
            })?
            .id;
        self.delete_passage(story_id, id)
    }

    // ───────────────────── layout ─────────────────────

    /// Move a passage so it overlaps no other in its story, snapping to
    /// `grid` when the story has snapping on. Persists only if the
    /// position actually changed; returns the new `(left, top)` in that
    /// case so the caller can put it on the wire.
    pub fn position_passage(
        &mut self,
        story_id: Uuid,
        passage_id: Uuid,
        grid: Option<f64>,
    ) -> Result<Option<(f64, f64)>, StoreError> {
        self.position_passage_filtered(story_id, passage_id, grid, |_| true)
    }

    /// As [`position_passage`](Self::position_passage), considering only
    /// passages accepted by `filter` (e.g. to ignore a group being
    /// dragged together).
    pub fn position_passage_filtered<F>(
        &mut self,
        story_id: Uuid,
        passage_id: Uuid,
        grid: Option<f64>,
        filter: F,
    ) -> Result<Option<(f64, f64)>, StoreError>
    where
        F: Fn(&Passage) -> bool,
    {
        let story = self.story_mut(story_id)?;
        let passage = story
            .passage(passage_id)
            .ok_or(StoreError::PassageNotFound(passage_id))?;
        let candidate = passage.rect();

        let others: Vec<Rect> = story
            .passages
            .iter()
            .filter(|p| p.id != passage_id && filter(p))
            .map(Passage::rect)
            .collect();

        let grid = if story.snap_to_grid { grid } else { None };
        let resolved = resolve_position(&others, candidate, grid)?;

        if resolved.left == candidate.left && resolved.top == candidate.top {
            return Ok(None);
        }

        let moved = (resolved.left.max(0.0), resolved.top.max(0.0));
        let passage = story
            .passage_mut(passage_id)
            .ok_or(StoreError::PassageNotFound(passage_id))?;
        passage.left = moved.0;
        passage.top = moved.1;
        story.last_update = Utc::now();
        Ok(Some(moved))
    }

    // ───────────────────── persistence contract ─────────────────────

    /// Serialize the whole graph for an external persistence
    /// collaborator.
    pub fn snapshot(&self) -> Result<Value, StoreError> {
        Ok(serde_json::to_value(&self.stories)?)
    }

    /// Replace the graph from a previously taken snapshot.
    pub fn restore(&mut self, snapshot: Value) -> Result<(), StoreError> {
        self.stories = serde_json::from_value(snapshot)?;
        Ok(())
    }
}

fn apply_update(passage: &mut Passage, update: PassageUpdate) {
    if update.left.is_some() {
        passage.left = clamp_coord(update.left, passage.left);
    }
    if update.top.is_some() {
        passage.top = clamp_coord(update.top, passage.top);
    }
    if let Some(width) = update.width {
        if width.is_finite() && width > 0.0 {
            passage.width = width;
        }
    }
    if let Some(height) = update.height {
        if height.is_finite() && height > 0.0 {
            passage.height = height;
        }
    }
    if let Some(name) = update.name {
        passage.name = name;
    }
    if let Some(patch) = update.patch {
        passage.text = patch::apply(&passage.text, &patch);
    }
    if let Some(text) = update.text {
        passage.text = text;
    }
    if let Some(tags) = update.tags {
        passage.tags.clear();
        for tag in tags {
            passage.add_tag(&tag);
        }
    }
    if let Some(selected) = update.selected {
        passage.selected = selected;
    }
}
