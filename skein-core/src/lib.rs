//! # skein-core — Story graph replica
//!
//! The canonical in-memory story/passage graph shared by every part of
//! the editor, plus the text-patch and link-parsing primitives the wire
//! protocol is built on.
//!
//! ```text
//! UI edit ──► StoryStore (apply + clamp + stamp) ──► skein-layout
//!                 ▲                                   (positioning)
//!                 │
//! remote wire action (applied through the same mutations)
//! ```
//!
//! ## Modules
//!
//! - [`story`] — `Story` and `Passage` data model
//! - [`store`] — `StoryStore`, the replica all mutations flow through
//! - [`patch`] — minimal `(offset, deleted, inserted)` text edits
//! - [`links`] — `[[link]]` target extraction from passage text

pub mod links;
pub mod patch;
pub mod store;
pub mod story;

pub use patch::TextPatch;
pub use store::{PassageProps, PassageUpdate, StoreError, StoryProps, StoryStore};
pub use story::{story_id_for, Passage, Story};
