//! Wire protocol for story channels.
//!
//! Every mutation crosses the broker as a verb plus an ordered argument
//! list, wrapped in a JSON envelope carrying the author:
//!
//! ```text
//! {"event": "set", "author": "alice",
//!  "body": ["Some Passage", ["text", [5, 0, ","]]]}
//! ```
//!
//! Text edits never carry the full passage text — only the minimal
//! `(offset, deleted, inserted)` patch, applied by receivers against
//! their *current* text. Verbs and field actions are closed sum types
//! matched exhaustively; anything unknown decodes to a distinct error
//! so callers can log and drop it without dying.

use serde_json::{json, Value};
use skein_core::TextPatch;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unknown verb {0:?}")]
    UnknownVerb(String),
    #[error("unknown field action {0:?}")]
    UnknownFieldAction(String),
    #[error("unknown story field {0:?}")]
    UnknownStoryField(String),
    #[error("unknown lobby event {0:?}")]
    UnknownLobbyEvent(String),
    #[error("malformed {0:?} payload")]
    Malformed(String),
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Update to a single field of a passage.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldAction {
    Location { left: f64, top: f64 },
    Size { width: f64, height: f64 },
    Name(String),
    Text(TextPatch),
    AddTag(String),
    RemoveTag(String),
    /// Ephemeral multi-cursor indication; `author` is the selecting user.
    Select { author: String },
    Deselect { author: String },
}

/// Story-level field update.
#[derive(Debug, Clone, PartialEq)]
pub enum StoryAction {
    StartingPassage { passage: String },
    Tag { name: String, color: String },
}

/// One mutation on a story channel. Passages are addressed by name.
#[derive(Debug, Clone, PartialEq)]
pub enum WireAction {
    Add { name: String, left: f64, top: f64 },
    Set { passage: String, action: FieldAction },
    Delete { passage: String },
    /// Ephemeral cursor broadcast; never applied to persistent state.
    ShowPointer { author: String, x: f64, y: f64 },
    SetStory(StoryAction),
}

/// Story lifecycle notification on the lobby topic.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    Created { name: String },
    Renamed { old: String, new: String },
    Deleted { name: String },
}

/// A wire action plus its author, as carried on a story topic.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEnvelope {
    pub author: String,
    pub action: WireAction,
}

impl WireEnvelope {
    pub fn new(author: impl Into<String>, action: WireAction) -> Self {
        Self {
            author: author.into(),
            action,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "event": self.action.verb(),
            "author": self.author,
            "body": self.action.body(),
        })
    }

    pub fn from_json(value: &Value) -> Result<Self, ProtocolError> {
        let obj = value.as_object().ok_or(ProtocolError::NotAnObject)?;
        let verb = obj
            .get("event")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::NotAnObject)?;
        let author = obj
            .get("author")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let body = obj.get("body").unwrap_or(&Value::Null);

        Ok(Self {
            author,
            action: WireAction::decode(verb, body)?,
        })
    }

    /// Serialize to the JSON text form sent over a channel.
    pub fn encode(&self) -> String {
        self.to_json().to_string()
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json(&value)
    }
}

impl WireAction {
    pub fn verb(&self) -> &'static str {
        match self {
            WireAction::Add { .. } => "add",
            WireAction::Set { .. } => "set",
            WireAction::Delete { .. } => "delete",
            WireAction::ShowPointer { .. } => "show_pointer",
            WireAction::SetStory(_) => "set_story",
        }
    }

    fn body(&self) -> Value {
        match self {
            WireAction::Add { name, left, top } => json!([name, [left, top]]),
            WireAction::Set { passage, action } => json!([passage, action.body()]),
            WireAction::Delete { passage } => json!([passage]),
            WireAction::ShowPointer { author, x, y } => json!([author, x, y]),
            WireAction::SetStory(action) => action.body(),
        }
    }

    fn decode(verb: &str, body: &Value) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::Malformed(verb.to_owned());
        let args = body.as_array().ok_or_else(malformed)?;

        match verb {
            "add" => {
                let name = args.first().and_then(Value::as_str).ok_or_else(malformed)?;
                let at = args.get(1).and_then(Value::as_array).ok_or_else(malformed)?;
                let left = at.first().and_then(Value::as_f64).ok_or_else(malformed)?;
                let top = at.get(1).and_then(Value::as_f64).ok_or_else(malformed)?;
                Ok(WireAction::Add {
                    name: name.to_owned(),
                    left,
                    top,
                })
            }
            "set" => {
                let passage = args.first().and_then(Value::as_str).ok_or_else(malformed)?;
                let field = args.get(1).ok_or_else(malformed)?;
                Ok(WireAction::Set {
                    passage: passage.to_owned(),
                    action: FieldAction::decode(field)?,
                })
            }
            "delete" => {
                let passage = args.first().and_then(Value::as_str).ok_or_else(malformed)?;
                Ok(WireAction::Delete {
                    passage: passage.to_owned(),
                })
            }
            "show_pointer" => {
                let author = args.first().and_then(Value::as_str).ok_or_else(malformed)?;
                let x = args.get(1).and_then(Value::as_f64).ok_or_else(malformed)?;
                let y = args.get(2).and_then(Value::as_f64).ok_or_else(malformed)?;
                Ok(WireAction::ShowPointer {
                    author: author.to_owned(),
                    x,
                    y,
                })
            }
            "set_story" => Ok(WireAction::SetStory(StoryAction::decode(verb, args)?)),
            other => Err(ProtocolError::UnknownVerb(other.to_owned())),
        }
    }
}

impl FieldAction {
    fn body(&self) -> Value {
        match self {
            FieldAction::Location { left, top } => json!(["location", [left, top]]),
            FieldAction::Size { width, height } => json!(["size", [width, height]]),
            FieldAction::Name(new) => json!(["name", new]),
            FieldAction::Text(patch) => {
                json!(["text", [patch.offset, patch.deleted, patch.inserted]])
            }
            FieldAction::AddTag(tag) => json!(["add_tag", tag]),
            FieldAction::RemoveTag(tag) => json!(["remove_tag", tag]),
            FieldAction::Select { author } => json!(["select", author]),
            FieldAction::Deselect { author } => json!(["deselect", author]),
        }
    }

    fn decode(value: &Value) -> Result<Self, ProtocolError> {
        let args = value
            .as_array()
            .ok_or_else(|| ProtocolError::Malformed("set".to_owned()))?;
        let kind = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("set".to_owned()))?;
        let malformed = || ProtocolError::Malformed(format!("set/{kind}"));
        let arg = |idx: usize| args.get(idx).ok_or_else(malformed);

        match kind {
            "location" => {
                let at = arg(1)?.as_array().ok_or_else(malformed)?;
                Ok(FieldAction::Location {
                    left: at.first().and_then(Value::as_f64).ok_or_else(malformed)?,
                    top: at.get(1).and_then(Value::as_f64).ok_or_else(malformed)?,
                })
            }
            "size" => {
                let dims = arg(1)?.as_array().ok_or_else(malformed)?;
                Ok(FieldAction::Size {
                    width: dims.first().and_then(Value::as_f64).ok_or_else(malformed)?,
                    height: dims.get(1).and_then(Value::as_f64).ok_or_else(malformed)?,
                })
            }
            "name" => Ok(FieldAction::Name(
                arg(1)?.as_str().ok_or_else(malformed)?.to_owned(),
            )),
            "text" => {
                let patch = arg(1)?.as_array().ok_or_else(malformed)?;
                let offset = patch
                    .first()
                    .and_then(Value::as_u64)
                    .ok_or_else(malformed)?;
                let deleted = patch.get(1).and_then(Value::as_u64).ok_or_else(malformed)?;
                let inserted = patch.get(2).and_then(Value::as_str).ok_or_else(malformed)?;
                Ok(FieldAction::Text(TextPatch {
                    offset: offset as usize,
                    deleted: deleted as usize,
                    inserted: inserted.to_owned(),
                }))
            }
            "add_tag" => Ok(FieldAction::AddTag(
                arg(1)?.as_str().ok_or_else(malformed)?.to_owned(),
            )),
            "remove_tag" => Ok(FieldAction::RemoveTag(
                arg(1)?.as_str().ok_or_else(malformed)?.to_owned(),
            )),
            "select" => Ok(FieldAction::Select {
                author: arg(1)?.as_str().ok_or_else(malformed)?.to_owned(),
            }),
            "deselect" => Ok(FieldAction::Deselect {
                author: arg(1)?.as_str().ok_or_else(malformed)?.to_owned(),
            }),
            other => Err(ProtocolError::UnknownFieldAction(other.to_owned())),
        }
    }
}

impl StoryAction {
    fn body(&self) -> Value {
        match self {
            StoryAction::StartingPassage { passage } => {
                json!(["starting_passage", passage])
            }
            StoryAction::Tag { name, color } => json!(["tag", name, color]),
        }
    }

    fn decode(verb: &str, args: &[Value]) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::Malformed(verb.to_owned());
        let kind = args.first().and_then(Value::as_str).ok_or_else(malformed)?;
        match kind {
            "starting_passage" => Ok(StoryAction::StartingPassage {
                passage: args.get(1).and_then(Value::as_str).ok_or_else(malformed)?.to_owned(),
            }),
            "tag" => Ok(StoryAction::Tag {
                name: args.get(1).and_then(Value::as_str).ok_or_else(malformed)?.to_owned(),
                color: args.get(2).and_then(Value::as_str).ok_or_else(malformed)?.to_owned(),
            }),
            other => Err(ProtocolError::UnknownStoryField(other.to_owned())),
        }
    }
}

impl LobbyEvent {
    pub fn verb(&self) -> &'static str {
        match self {
            LobbyEvent::Created { .. } => "created",
            LobbyEvent::Renamed { .. } => "renamed",
            LobbyEvent::Deleted { .. } => "deleted",
        }
    }

    pub fn to_json(&self) -> Value {
        let body = match self {
            LobbyEvent::Created { name } => json!([name]),
            LobbyEvent::Renamed { old, new } => json!([old, new]),
            LobbyEvent::Deleted { name } => json!([name]),
        };
        json!({ "event": self.verb(), "body": body })
    }

    pub fn from_json(value: &Value) -> Result<Self, ProtocolError> {
        let obj = value.as_object().ok_or(ProtocolError::NotAnObject)?;
        let verb = obj
            .get("event")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::NotAnObject)?;
        let malformed = || ProtocolError::Malformed(verb.to_owned());
        let args = obj
            .get("body")
            .and_then(Value::as_array)
            .ok_or_else(malformed)?;
        let name = |idx: usize| {
            args.get(idx)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(malformed)
        };

        match verb {
            "created" => Ok(LobbyEvent::Created { name: name(0)? }),
            "renamed" => Ok(LobbyEvent::Renamed {
                old: name(0)?,
                new: name(1)?,
            }),
            "deleted" => Ok(LobbyEvent::Deleted { name: name(0)? }),
            other => Err(ProtocolError::UnknownLobbyEvent(other.to_owned())),
        }
    }
}
