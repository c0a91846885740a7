//! Identifier types for search execution
//!
//! `ContextId` is a ULID-backed identifier for one shard-level search
//! context. `ShardTarget` names the shard a request executes against.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use ulid::Ulid;

/// Type-safe wrapper for search context identifiers
///
/// Serialized as the canonical ULID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ContextId(u128);

impl ContextId {
    /// Generate a new ULID-based context identifier
    pub fn new() -> Self {
        Self(Ulid::new().0)
    }

    /// Create a ContextId from a ULID
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid.0)
    }

    /// Convert to ULID
    pub fn as_ulid(self) -> Ulid {
        Ulid(self.0)
    }

    /// Create from a raw value
    pub fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Get the raw u128 value
    pub fn raw(self) -> u128 {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ulid())
    }
}

impl FromStr for ContextId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_ulid(Ulid::from_str(s)?))
    }
}

impl Serialize for ContextId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContextId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// The shard a search request is executed against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardTarget {
    /// Name of the index the shard belongs to
    pub index: String,
    /// Shard number within the index
    pub shard: u32,
    /// Node holding the shard, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl ShardTarget {
    pub fn new(index: impl Into<String>, shard: u32) -> Self {
        Self {
            index: index.into(),
            shard,
            node_id: None,
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }
}

impl Display for ShardTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(node) => write!(f, "[{}][{}][{}]", node, self.index, self.shard),
            None => write!(f, "[{}][{}]", self.index, self.shard),
        }
    }
}
