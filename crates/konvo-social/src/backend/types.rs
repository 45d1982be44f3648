//! Path and signal types shared by every backend implementation.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Location of a value in one of the backend's two stores.
///
/// The ephemeral store is a path-addressed tree that supports disconnect
/// compensation; the durable store holds documents grouped in collections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorePath {
    /// A slash-separated path in the ephemeral tree, without leading slash.
    Ephemeral(String),
    /// A document in the durable store.
    Document { collection: String, id: String },
}

impl StorePath {
    pub fn ephemeral(path: impl Into<String>) -> Self {
        StorePath::Ephemeral(path.into().trim_matches('/').to_string())
    }

    pub fn document(collection: impl Into<String>, id: impl Into<String>) -> Self {
        StorePath::Document {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, StorePath::Ephemeral(_))
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorePath::Ephemeral(path) => write!(f, "/{path}"),
            StorePath::Document { collection, id } => write!(f, "{collection}/{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

/// The backend's connectivity meta-signal as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Connected,
    Disconnected,
}

impl Connectivity {
    pub fn is_connected(self) -> bool {
        self == Connectivity::Connected
    }
}
