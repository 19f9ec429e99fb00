//! The action layer: one story, one channel, one lock session.
//!
//! A [`StoryEditor`] sits between the local [`StoryStore`] replica and
//! the story's broker topic. Local edits mutate the store first and are
//! then encoded onto the wire; remote envelopes are decoded and applied
//! through the same store mutations, so every replica clamps, stamps,
//! and re-designates identically.
//!
//! Outbound traffic is gated by the lock session: only the write-lock
//! holder encodes anything, pointer broadcasts included. Inbound
//! envelopes are applied regardless of lock state — that is the whole
//! point of a read-only replica.
//!
//! There is no rollback on a failed send. A lost message leaves the
//! local store ahead of the peers until the periodic full-story save
//! re-converges them; sends log their failures and move on.

use uuid::Uuid;

use skein_core::{
    links, patch, Passage, PassageProps, PassageUpdate, StoreError, StoryProps, StoryStore,
};
use skein_layout::linked_positions;

use crate::lock::LockSession;
use crate::protocol::{FieldAction, LobbyEvent, StoryAction, WireAction, WireEnvelope};
use crate::transport::Channel;

/// What a remote envelope did, for the caller driving a UI.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    /// The store changed; re-render from it.
    Updated,
    /// A peer's cursor moved. Never touches the store.
    Pointer { author: String, x: f64, y: f64 },
    /// A peer selected or deselected a passage.
    Selection {
        author: String,
        passage: String,
        selected: bool,
    },
}

/// Editing session on one story.
pub struct StoryEditor {
    story_id: Uuid,
    author: String,
    session: LockSession,
    channel: Box<dyn Channel>,
}

impl StoryEditor {
    pub fn new(
        story_id: Uuid,
        author: impl Into<String>,
        session: LockSession,
        channel: Box<dyn Channel>,
    ) -> Self {
        Self {
            story_id,
            author: author.into(),
            session,
            channel,
        }
    }

    pub fn story_id(&self) -> Uuid {
        self.story_id
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn session(&self) -> &LockSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut LockSession {
        &mut self.session
    }

    /// Local mutations need the write lock and a story not flagged
    /// read-only in the listing. The story flag is the store's own
    /// defense; a missing story falls through to the operation's
    /// lookup error.
    fn may_edit(&self, store: &StoryStore) -> bool {
        self.session.can_edit()
            && store
                .story(self.story_id)
                .map(|s| !s.read_only)
                .unwrap_or(true)
    }

    /// Encode and send, swallowing transport failures with a warning.
    /// The store mutation that preceded the send stands either way.
    async fn publish(&self, action: WireAction) {
        let envelope = WireEnvelope::new(self.author.clone(), action);
        if let Err(e) = self.channel.send(envelope).await {
            log::warn!("send on {:?} failed: {e}", self.channel.topic());
        }
    }

    // ───────────────────── local edits ─────────────────────

    /// Create a passage and announce it. Returns `None` without
    /// touching anything when this session cannot write.
    pub async fn create_passage(
        &mut self,
        store: &mut StoryStore,
        props: PassageProps,
    ) -> Result<Option<Uuid>, StoreError> {
        if !self.may_edit(store) {
            return Ok(None);
        }
        let id = store.create_passage(self.story_id, props)?;
        let (name, left, top) = {
            let p = store
                .story(self.story_id)?
                .passage(id)
                .ok_or(StoreError::PassageNotFound(id))?;
            (p.name.clone(), p.left, p.top)
        };
        self.publish(WireAction::Add { name, left, top }).await;
        Ok(Some(id))
    }

    /// Apply a partial update locally and send one wire action per
    /// changed field. Text rides as a minimal patch against the
    /// pre-update text; tags ride as an add/remove diff. The rename, if
    /// any, goes last so every other action still addresses the name
    /// the peers know.
    pub async fn update_passage(
        &mut self,
        store: &mut StoryStore,
        passage_id: Uuid,
        update: PassageUpdate,
    ) -> Result<(), StoreError> {
        if !self.may_edit(store) {
            return Ok(());
        }
        let before = store
            .story(self.story_id)?
            .passage(passage_id)
            .ok_or(StoreError::PassageNotFound(passage_id))?
            .clone();

        store.update_passage(self.story_id, passage_id, update.clone())?;
        let after = store
            .story(self.story_id)?
            .passage(passage_id)
            .ok_or(StoreError::PassageNotFound(passage_id))?
            .clone();

        let mut actions = Vec::new();
        if update.left.is_some() && update.top.is_some() {
            actions.push(FieldAction::Location {
                left: after.left,
                top: after.top,
            });
        }
        if update.width.is_some() && update.height.is_some() {
            actions.push(FieldAction::Size {
                width: after.width,
                height: after.height,
            });
        }
        if let Some(patch) = update.patch {
            if !patch.is_noop() {
                actions.push(FieldAction::Text(patch));
            }
        } else if update.text.is_some() {
            let patch = patch::diff(&before.text, &after.text);
            if !patch.is_noop() {
                actions.push(FieldAction::Text(patch));
            }
        }
        if update.tags.is_some() {
            for tag in &after.tags {
                if !before.has_tag(tag) {
                    actions.push(FieldAction::AddTag(tag.clone()));
                }
            }
            for tag in &before.tags {
                if !after.has_tag(tag) {
                    actions.push(FieldAction::RemoveTag(tag.clone()));
                }
            }
        }
        if update.name.is_some() && after.name != before.name {
            actions.push(FieldAction::Name(after.name.clone()));
        }

        for action in actions {
            self.publish(WireAction::Set {
                passage: before.name.clone(),
                action,
            })
            .await;
        }

        // A rename redirects [[links]] in every other passage; the
        // rewrites travel as ordinary text patches after the rename
        // itself, so receivers resolve names the same way we did.
        if update.name.is_some() && after.name != before.name {
            for (passage, patch) in
                store.change_links(self.story_id, &before.name, &after.name)?
            {
                self.publish(WireAction::Set {
                    passage,
                    action: FieldAction::Text(patch),
                })
                .await;
            }
        }
        Ok(())
    }

    pub async fn delete_passage(
        &mut self,
        store: &mut StoryStore,
        passage_id: Uuid,
    ) -> Result<(), StoreError> {
        if !self.may_edit(store) {
            return Ok(());
        }
        let name = store
            .story(self.story_id)?
            .passage(passage_id)
            .ok_or(StoreError::PassageNotFound(passage_id))?
            .name
            .clone();
        store.delete_passage(self.story_id, passage_id)?;
        store.clean_up_tag_colors(self.story_id)?;
        self.publish(WireAction::Delete { passage: name }).await;
        Ok(())
    }

    /// Make the selection exactly the set accepted by `filter`,
    /// announcing each change so peers can render it.
    pub async fn select_passages<F>(
        &mut self,
        store: &mut StoryStore,
        filter: F,
    ) -> Result<(), StoreError>
    where
        F: Fn(&Passage) -> bool,
    {
        if !self.may_edit(store) {
            return Ok(());
        }
        let changes: Vec<(Uuid, String, bool)> = store
            .story(self.story_id)?
            .passages
            .iter()
            .filter_map(|p| {
                let want = filter(p);
                (p.selected != want).then(|| (p.id, p.name.clone(), want))
            })
            .collect();

        for (id, name, selected) in changes {
            store.update_passage(
                self.story_id,
                id,
                PassageUpdate {
                    selected: Some(selected),
                    ..Default::default()
                },
            )?;
            let action = if selected {
                FieldAction::Select {
                    author: self.author.clone(),
                }
            } else {
                FieldAction::Deselect {
                    author: self.author.clone(),
                }
            };
            self.publish(WireAction::Set {
                passage: name,
                action,
            })
            .await;
        }
        Ok(())
    }

    /// Displace a passage clear of its neighbors, announcing the move
    /// only if it actually moved.
    pub async fn position_passage(
        &mut self,
        store: &mut StoryStore,
        passage_id: Uuid,
        grid: Option<f64>,
    ) -> Result<(), StoreError> {
        if !self.may_edit(store) {
            return Ok(());
        }
        let name = store
            .story(self.story_id)?
            .passage(passage_id)
            .ok_or(StoreError::PassageNotFound(passage_id))?
            .name
            .clone();
        if let Some((left, top)) = store.position_passage(self.story_id, passage_id, grid)? {
            self.publish(WireAction::Set {
                passage: name,
                action: FieldAction::Location { left, top },
            })
            .await;
        }
        Ok(())
    }

    /// Create empty passages for link targets newly written into a
    /// passage's text. `old_text` is the text before the edit. New
    /// passages are fanned out below the source and nudged clear of
    /// existing ones; each is announced with its final position.
    pub async fn create_newly_linked_passages(
        &mut self,
        store: &mut StoryStore,
        passage_id: Uuid,
        old_text: &str,
        grid: Option<f64>,
    ) -> Result<Vec<Uuid>, StoreError> {
        if !self.may_edit(store) {
            return Ok(Vec::new());
        }
        let (source_rect, targets) = {
            let story = store.story(self.story_id)?;
            let source = story
                .passage(passage_id)
                .ok_or(StoreError::PassageNotFound(passage_id))?;
            let targets: Vec<String> = links::new_links(old_text, &source.text)
                .into_iter()
                .filter(|name| story.passage_by_name(name).is_none())
                .collect();
            (source.rect(), targets)
        };

        let spots = linked_positions(&source_rect, targets.len());
        let mut created = Vec::with_capacity(targets.len());
        for (name, (left, top)) in targets.into_iter().zip(spots) {
            let id = store.create_passage(self.story_id, PassageProps::at(name, left, top))?;
            store.position_passage(self.story_id, id, grid)?;
            let (name, left, top) = {
                let p = store
                    .story(self.story_id)?
                    .passage(id)
                    .ok_or(StoreError::PassageNotFound(id))?;
                (p.name.clone(), p.left, p.top)
            };
            self.publish(WireAction::Add { name, left, top }).await;
            created.push(id);
        }
        Ok(created)
    }

    pub async fn set_tag_color(
        &mut self,
        store: &mut StoryStore,
        tag: &str,
        color: &str,
    ) -> Result<(), StoreError> {
        if !self.may_edit(store) {
            return Ok(());
        }
        store.set_tag_color(self.story_id, tag, color)?;
        self.publish(WireAction::SetStory(StoryAction::Tag {
            name: tag.to_owned(),
            color: color.to_owned(),
        }))
        .await;
        Ok(())
    }

    pub async fn set_start_passage(
        &mut self,
        store: &mut StoryStore,
        passage_id: Uuid,
    ) -> Result<(), StoreError> {
        if !self.may_edit(store) {
            return Ok(());
        }
        store.set_start_passage(self.story_id, passage_id)?;
        let name = store
            .story(self.story_id)?
            .passage(passage_id)
            .ok_or(StoreError::PassageNotFound(passage_id))?
            .name
            .clone();
        self.publish(WireAction::SetStory(StoryAction::StartingPassage {
            passage: name,
        }))
        .await;
        Ok(())
    }

    /// Broadcast this session's cursor. Ephemeral, so only the lock
    /// gate applies; the story's read-only flag is about mutations.
    pub async fn show_pointer(&self, x: f64, y: f64) {
        if !self.session.can_edit() {
            return;
        }
        self.publish(WireAction::ShowPointer {
            author: self.author.clone(),
            x,
            y,
        })
        .await;
    }

    // ───────────────────── remote apply ─────────────────────

    /// Apply one remote envelope to the store. Stale passage names —
    /// the sender raced a delete or rename we already applied — are
    /// logged and dropped; the periodic save cycle repairs any drift.
    pub fn apply_remote(
        &mut self,
        store: &mut StoryStore,
        envelope: &WireEnvelope,
    ) -> Option<EditorEvent> {
        match &envelope.action {
            WireAction::Add { name, left, top } => {
                match store.create_passage(
                    self.story_id,
                    PassageProps::at(name.clone(), *left, *top),
                ) {
                    Ok(_) => Some(EditorEvent::Updated),
                    Err(e) => {
                        log::warn!("dropping remote add of {name:?}: {e}");
                        None
                    }
                }
            }
            WireAction::Set { passage, action } => self.apply_remote_set(store, passage, action),
            WireAction::Delete { passage } => {
                match store.delete_passage_by_name(self.story_id, passage) {
                    Ok(()) => {
                        let _ = store.clean_up_tag_colors(self.story_id);
                        Some(EditorEvent::Updated)
                    }
                    // Already gone here; deletes are idempotent.
                    Err(StoreError::PassageNameNotFound(_, _)) => None,
                    Err(e) => {
                        log::warn!("dropping remote delete of {passage:?}: {e}");
                        None
                    }
                }
            }
            WireAction::ShowPointer { author, x, y } => Some(EditorEvent::Pointer {
                author: author.clone(),
                x: *x,
                y: *y,
            }),
            WireAction::SetStory(StoryAction::StartingPassage { passage }) => {
                let id = match store.story(self.story_id) {
                    Ok(story) => story.passage_by_name(passage).map(|p| p.id),
                    Err(e) => {
                        log::warn!("dropping remote start passage: {e}");
                        return None;
                    }
                };
                match id {
                    Some(pid) => match store.set_start_passage(self.story_id, pid) {
                        Ok(()) => Some(EditorEvent::Updated),
                        Err(e) => {
                            log::warn!("dropping remote start passage: {e}");
                            None
                        }
                    },
                    None => {
                        log::warn!("dropping remote start passage: no passage {passage:?}");
                        None
                    }
                }
            }
            WireAction::SetStory(StoryAction::Tag { name, color }) => {
                match store.set_tag_color(self.story_id, name, color) {
                    Ok(()) => Some(EditorEvent::Updated),
                    Err(e) => {
                        log::warn!("dropping remote tag color: {e}");
                        None
                    }
                }
            }
        }
    }

    fn apply_remote_set(
        &mut self,
        store: &mut StoryStore,
        passage: &str,
        action: &FieldAction,
    ) -> Option<EditorEvent> {
        let update = match action {
            FieldAction::Location { left, top } => PassageUpdate {
                left: Some(*left),
                top: Some(*top),
                ..Default::default()
            },
            FieldAction::Size { width, height } => PassageUpdate {
                width: Some(*width),
                height: Some(*height),
                ..Default::default()
            },
            FieldAction::Name(new) => PassageUpdate {
                name: Some(new.clone()),
                ..Default::default()
            },
            FieldAction::Text(patch) => PassageUpdate {
                patch: Some(patch.clone()),
                ..Default::default()
            },
            FieldAction::AddTag(tag) | FieldAction::RemoveTag(tag) => {
                let story = match store.story(self.story_id) {
                    Ok(story) => story,
                    Err(e) => {
                        log::warn!("dropping remote tag change: {e}");
                        return None;
                    }
                };
                let Some(current) = story.passage_by_name(passage) else {
                    log::warn!("dropping remote tag change on unknown passage {passage:?}");
                    return None;
                };
                let mut tags = current.tags.clone();
                if matches!(action, FieldAction::AddTag(_)) {
                    if !tags.iter().any(|t| t == tag) {
                        tags.push(tag.clone());
                    }
                } else {
                    tags.retain(|t| t != tag);
                }
                PassageUpdate {
                    tags: Some(tags),
                    ..Default::default()
                }
            }
            FieldAction::Select { author } | FieldAction::Deselect { author } => {
                let selected = matches!(action, FieldAction::Select { .. });
                return match store.update_passage_by_name(
                    self.story_id,
                    passage,
                    PassageUpdate {
                        selected: Some(selected),
                        ..Default::default()
                    },
                ) {
                    Ok(()) => Some(EditorEvent::Selection {
                        author: author.clone(),
                        passage: passage.to_owned(),
                        selected,
                    }),
                    Err(e) => {
                        log::warn!("dropping remote selection on {passage:?}: {e}");
                        None
                    }
                };
            }
        };

        match store.update_passage_by_name(self.story_id, passage, update) {
            Ok(()) => Some(EditorEvent::Updated),
            Err(e) => {
                log::warn!("dropping remote set on {passage:?}: {e}");
                None
            }
        }
    }

    /// Apply a lobby notification to the store. These are not tied to
    /// one editor: they create, rename, and delete whole stories.
    pub fn apply_lobby(store: &mut StoryStore, event: &LobbyEvent) {
        let result = match event {
            LobbyEvent::Created { name } => store
                .create_story(StoryProps {
                    name: name.clone(),
                    ..Default::default()
                })
                .map(|_| ()),
            LobbyEvent::Renamed { old, new } => match store.story_by_name(old) {
                Ok(story) => {
                    let id = story.id;
                    store.rename_story(id, new)
                }
                Err(e) => Err(e),
            },
            LobbyEvent::Deleted { name } => store.delete_story_by_name(name),
        };
        if let Err(e) = result {
            log::warn!("dropping lobby {:?} event: {e}", event.verb());
        }
    }

    /// Receive and apply envelopes until one produces an event, or the
    /// channel closes.
    pub async fn pump(&mut self, store: &mut StoryStore) -> Option<EditorEvent> {
        loop {
            let envelope = self.channel.recv().await?;
            if let Some(event) = self.apply_remote(store, &envelope) {
                return Some(event);
            }
        }
    }

    /// Leave the channel and release the lock.
    pub async fn close(&mut self) {
        self.channel.leave().await;
        self.session.close().await;
    }
}
