//! Identifiers shared by nodes, ports, connections and shared objects.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Process-wide identifier, assigned by whichever collaborator created the object.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The group a node lives in: the root level, or another (group) node.
///
/// Serialized as the string `"top"` for the root, otherwise the parent's id.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GroupId {
    Top,
    Node(Id),
}

pub const TOP_GROUP: &str = "top";

impl GroupId {
    pub fn parent(&self) -> Option<&Id> {
        match self {
            GroupId::Top => None,
            GroupId::Node(id) => Some(id),
        }
    }
}

impl Default for GroupId {
    fn default() -> Self {
        GroupId::Top
    }
}

impl From<String> for GroupId {
    fn from(s: String) -> Self {
        if s == TOP_GROUP {
            GroupId::Top
        } else {
            GroupId::Node(Id(s))
        }
    }
}

impl From<GroupId> for String {
    fn from(g: GroupId) -> Self {
        match g {
            GroupId::Top => TOP_GROUP.to_owned(),
            GroupId::Node(id) => id.0,
        }
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        GroupId::from(s.to_owned())
    }
}
