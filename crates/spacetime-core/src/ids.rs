//! Identifiers used throughout the version graph.
//!
//! All identifiers are plain strings on the wire. Newtypes keep version ids,
//! eids, peer names and transaction ids from being mixed up in the graph code.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use ulid::Ulid;

const ROOT: &str = "ROOT";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of a version (a node in the version graph).
    VersionId
);

string_id!(
    /// Identifier shared by every edge that carries the same logical change.
    Eid
);

string_id!(
    /// Name of an observer of the graph: a remote application or the local heap.
    PeerId
);

string_id!(
    /// Identifier issued by `get` so the requester can later confirm consumption.
    TransactionId
);

impl VersionId {
    /// The distinguished initial version.
    pub fn root() -> Self {
        Self(ROOT.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    /// A fresh, globally unique version id.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Id of the merge version joining `current` and `conflicting` below
    /// `parent`. Replicas performing the same merge derive the same id.
    pub fn merge_of(parent: &VersionId, current: &VersionId, conflicting: &VersionId) -> Self {
        let digest = digest_parts([parent.as_str(), current.as_str(), conflicting.as_str()]);
        Self(format!("m-{}", &digest[..32]))
    }
}

impl Eid {
    /// A fresh eid. ULIDs sort by creation time, which the default
    /// last-writer-wins resolution relies on.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Deterministic eid for a run of edges collapsed into one.
    ///
    /// Two replicas that collapse the same run independently derive the same
    /// eid, so alias detection keeps working across them. The newest member
    /// leads, so a combined eid sorts like the latest change it contains.
    pub fn combine(parts: &[Eid]) -> Self {
        let newest = parts.iter().max().map(|e| e.as_str()).unwrap_or_default();
        let digest = digest_parts(parts.iter().map(|e| e.as_str()));
        Self(format!("{}+{}", newest, &digest[..16]))
    }
}

fn digest_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

impl TransactionId {
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }
}
