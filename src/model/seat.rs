use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier the server assigns to a seat
pub type ServerSeatId = i64;

/// Client-side key for a seat that has not been created on the server yet
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalSeatKey(String);

impl LocalSeatKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// A fresh key that no other local seat carries
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity of a seat in a layout.
///
/// `New` seats exist only locally; `Existing` seats carry the server id.
/// The reconciler classifies records purely on this distinction.
///
/// On the wire a new seat has a `null` id and an existing seat a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<ServerSeatId>", into = "Option<ServerSeatId>")]
pub enum SeatId {
    New(LocalSeatKey),
    Existing(ServerSeatId),
}

impl SeatId {
    /// A new local id with a generated key
    pub fn new_local() -> Self {
        SeatId::New(LocalSeatKey::generate())
    }

    pub fn is_new(&self) -> bool {
        matches!(self, SeatId::New(_))
    }

    /// The server id, if the seat exists on the server
    pub fn server_id(&self) -> Option<ServerSeatId> {
        match self {
            SeatId::Existing(id) => Some(*id),
            SeatId::New(_) => None,
        }
    }
}

impl From<Option<ServerSeatId>> for SeatId {
    fn from(id: Option<ServerSeatId>) -> Self {
        match id {
            Some(id) => SeatId::Existing(id),
            None => SeatId::new_local(),
        }
    }
}

impl From<SeatId> for Option<ServerSeatId> {
    fn from(id: SeatId) -> Self {
        id.server_id()
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeatId::New(key) => write!(f, "new:{}", key.as_str()),
            SeatId::Existing(id) => write!(f, "{}", id),
        }
    }
}

/// Placement of a seat on the floor plan, in layout units
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One seat of a cafe layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatRecord {
    pub id: SeatId,
    pub label: String,
    pub position: Rect,
}

impl SeatRecord {
    pub fn new(id: SeatId, label: impl Into<String>, position: Rect) -> Self {
        Self {
            id,
            label: label.into(),
            position,
        }
    }

    /// Same label and placement, ignoring identity
    pub fn same_content(&self, other: &SeatRecord) -> bool {
        self.label == other.label && self.position == other.position
    }

    /// Creation payload for a seat the server does not know yet
    pub fn draft(&self) -> SeatDraft {
        SeatDraft {
            label: self.label.clone(),
            position: self.position,
        }
    }
}

/// Payload for creating a seat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatDraft {
    pub label: String,
    pub position: Rect,
}
