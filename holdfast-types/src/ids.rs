//! Identifier types used throughout the sync core.
//!
//! Server-assigned ids are opaque strings. Records created offline get a
//! temporary id (`temp_` followed by a UUID v7) until the server confirms
//! them and hands back the real one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix that marks a locally generated placeholder id.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Identifier of a record in a remote table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wraps a server-side id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh temporary id.
    /// UUID v7 keeps temporary ids roughly ordered by creation time.
    #[must_use]
    pub fn temporary() -> Self {
        Self(format!("{TEMP_ID_PREFIX}{}", Uuid::now_v7()))
    }

    /// Returns true if this id was generated locally and never confirmed.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the id, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for RecordId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The kinds of entity the sync core replicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Category,
    Goal,
    Entry,
}

impl EntityKind {
    /// All kinds, in declaration order.
    pub const ALL: [EntityKind; 3] = [EntityKind::Category, EntityKind::Goal, EntityKind::Entry];

    /// Returns the lowercase singular name (`"entry"`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::Category => "category",
            EntityKind::Goal => "goal",
            EntityKind::Entry => "entry",
        }
    }

    /// Returns the remote table that stores this kind.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            EntityKind::Category => "categories",
            EntityKind::Goal => "goals",
            EntityKind::Entry => "entries",
        }
    }

    /// Looks up a kind by its table name.
    #[must_use]
    pub fn from_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.table() == table)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "category" => Ok(EntityKind::Category),
            "goal" => Ok(EntityKind::Goal),
            "entry" => Ok(EntityKind::Entry),
            other => Err(crate::Error::UnknownKind(other.to_string())),
        }
    }
}

/// Identity of an entity: `(kind, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: RecordId,
}

impl EntityRef {
    /// Creates a new entity reference.
    #[must_use]
    pub fn new(kind: EntityKind, id: impl Into<RecordId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}
