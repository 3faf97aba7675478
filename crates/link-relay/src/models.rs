//! Monday entity type definitions and relation column codecs.

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Monday ids arrive as JSON numbers in webhooks and as strings from GraphQL.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

fn deserialize_raw_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match RawId::deserialize(deserializer)? {
        RawId::Number(n) => Ok(n),
        RawId::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid id: {s:?}"))),
    }
}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                deserialize_raw_id(deserializer).map($name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map($name)
            }
        }
    };
}

numeric_id!(
    /// Item (pulse) id
    ItemId
);
numeric_id!(
    /// Board id
    BoardId
);

/// A parent item reference: the item and the board it lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentRef {
    pub item_id: ItemId,
    pub board_id: BoardId,
}

/// A subitem as returned by the subitem lookup query.
#[derive(Debug, Clone)]
pub struct Subitem {
    pub id: ItemId,
    pub name: String,
    /// Parent item, when the subitem has one
    pub parent: Option<ParentRef>,
    /// Raw JSON of the subitem->main relation column
    pub relation_value: Option<String>,
}

/// Registered webhook subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub board_id: BoardId,
    pub event: String,
    #[serde(default)]
    pub config: Option<String>,
}

/// Single-field wrapper used by the read form of a relation value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedPulse {
    pub linked_pulse_id: ItemId,
}

/// Read form of a relation column value: `{"linkedPulseIds":[{"linkedPulseId":1}]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedPulses {
    #[serde(default)]
    pub linked_pulse_ids: Option<Vec<LinkedPulse>>,
}

impl LinkedPulses {
    /// Linked ids in wire order.
    pub fn ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.linked_pulse_ids
            .iter()
            .flatten()
            .map(|p| p.linked_pulse_id)
    }
}

/// Linked item ids of a relation column.
///
/// Semantically a set: inserting an id already present is a no-op and
/// equality ignores order. Insertion order is kept so the write payload is
/// deterministic.
#[derive(Debug, Clone, Default)]
pub struct RelationSet {
    ids: Vec<ItemId>,
}

impl RelationSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the wrapped read form returned by the API.
    ///
    /// A missing value means no links. Unparseable JSON is treated as an empty
    /// set with a warning: assuming no links only costs a redundant write.
    #[must_use]
    pub fn from_column_value(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty() && *s != "null") else {
            return Self::new();
        };

        match serde_json::from_str::<LinkedPulses>(raw) {
            Ok(value) => value.ids().collect(),
            Err(e) => {
                warn!(error = %e, raw = %raw, "Malformed relation column value, assuming no links");
                Self::new()
            }
        }
    }

    /// Encode the plain write form: `{"item_ids":[1,2]}`.
    #[must_use]
    pub fn to_write_value(&self) -> Value {
        json!({ "item_ids": self.ids.iter().map(|id| id.0).collect::<Vec<_>>() })
    }

    #[must_use]
    pub fn contains(&self, id: ItemId) -> bool {
        self.ids.contains(&id)
    }

    /// Insert an id. Returns `false` when it was already present.
    pub fn insert(&mut self, id: ItemId) -> bool {
        if self.contains(id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Set union, returning a new set.
    #[must_use]
    pub fn with(&self, id: ItemId) -> Self {
        let mut merged = self.clone();
        merged.insert(id);
        merged
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.ids.iter().copied()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<ItemId> {
        self.ids
    }
}

impl FromIterator<ItemId> for RelationSet {
    fn from_iter<T: IntoIterator<Item = ItemId>>(iter: T) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl PartialEq for RelationSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|id| other.contains(id))
    }
}

impl Eq for RelationSet {}
