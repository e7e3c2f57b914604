//! Message value for the Tether engine.
//!
//! The engine never interprets platform formats. It only needs a uniform
//! value to carry what an event said (`get_message`) and what a handler wants
//! to say back (`Bot::send`). Adapters convert their native segments into
//! [`Segment`]s at the boundary.

use std::fmt::{self, Display};
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Segment
// ============================================================================

/// A single unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Segment {
    /// Plain text content.
    Text(String),
    /// A user mention, identified by a user ID string.
    At(String),
    /// An image, identified by a platform-specific reference string
    /// (file path, URL, base64, etc.).
    Image(String),
    /// Any other platform segment, kept opaque.
    Other {
        /// Platform segment kind, e.g. `"face"`.
        kind: String,
        /// Raw segment payload.
        data: Value,
    },
}

impl Segment {
    /// Creates a text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Returns the type identifier of this segment (e.g. "text", "image", "at").
    pub fn segment_type(&self) -> &str {
        match self {
            Self::Text(_) => "text",
            Self::At(_) => "at",
            Self::Image(_) => "image",
            Self::Other { kind, .. } => kind,
        }
    }

    /// Returns true if this is a plain text segment.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Returns the text content if this is a text segment.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::At(id) => write!(f, "[at:{id}]"),
            Self::Image(r) => write!(f, "[image:{r}]"),
            Self::Other { kind, data } => write!(f, "[{kind}:{data}]"),
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// An ordered list of [`Segment`]s.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    segments: Vec<Segment>,
}

impl Message {
    /// Creates a new empty message.
    pub const fn new() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Creates a message from a vector of segments.
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Concatenates the content of all text segments.
    pub fn extract_plain_text(&self) -> String {
        self.iter().filter_map(Segment::as_text).collect()
    }

    /// Adds a segment to the end of the message.
    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Consumes the message and adds a segment (builder pattern).
    pub fn with(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    /// Adds a text segment.
    pub fn text(self, text: impl Into<String>) -> Self {
        self.with(Segment::Text(text.into()))
    }

    /// Adds an at-mention segment.
    pub fn at(self, id: impl Into<String>) -> Self {
        self.with(Segment::At(id.into()))
    }

    /// Consumes the message and returns the inner segments vector.
    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }
}

impl Deref for Message {
    type Target = [Segment];

    fn deref(&self) -> &Self::Target {
        &self.segments
    }
}

impl DerefMut for Message {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.segments
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::from(Segment::text(text))
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::from(Segment::Text(text))
    }
}

impl From<Segment> for Message {
    fn from(segment: Segment) -> Self {
        Self {
            segments: vec![segment],
        }
    }
}

impl From<Vec<Segment>> for Message {
    fn from(segments: Vec<Segment>) -> Self {
        Self { segments }
    }
}

impl FromIterator<Segment> for Message {
    fn from_iter<T: IntoIterator<Item = Segment>>(iter: T) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}
