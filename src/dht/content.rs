use crate::dht::{now_secs, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Type tag used when the caller does not give one
pub const DEFAULT_KIND: &str = "KContent";

/// A value stored in the DHT
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    /// Key the value is stored under
    pub key: NodeId,
    /// Name of the owner of this value
    pub owner: String,
    /// Type tag of this value
    pub kind: String,
    /// The value itself
    pub value: Vec<u8>,
    /// Creation time (unix seconds)
    pub created: i64,
    /// Last modification time (unix seconds)
    pub last_updated: i64,
}

impl Content {
    pub fn new(key: NodeId, owner: impl Into<String>, kind: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        let now = now_secs();
        Self {
            key,
            owner: owner.into(),
            kind: kind.into(),
            value: value.into(),
            created: now,
            last_updated: now,
        }
    }

    /// Creates content with a random key and the default type tag
    pub fn with_random_key(owner: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::new(NodeId::random(), owner, DEFAULT_KIND, value)
    }

    /// Replaces the value and bumps `last_updated`
    pub fn set_value(&mut self, value: impl Into<Vec<u8>>) {
        self.value = value.into();
        self.last_updated = now_secs();
    }
}

/// Search criteria for a value: key, owner and type tag must all match
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GetParameter {
    pub key: NodeId,
    pub owner: String,
    pub kind: String,
}

impl GetParameter {
    pub fn new(key: NodeId, owner: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            key,
            owner: owner.into(),
            kind: kind.into(),
        }
    }
}

impl From<&Content> for GetParameter {
    fn from(content: &Content) -> Self {
        Self::new(content.key, content.owner.clone(), content.kind.clone())
    }
}

impl From<&StorageEntryMetadata> for GetParameter {
    fn from(meta: &StorageEntryMetadata) -> Self {
        Self::new(meta.key, meta.owner.clone(), meta.kind.clone())
    }
}

/// Bookkeeping for a value held in the local content store.
///
/// Equality and hashing only look at `(key, owner, kind)`, so a newer version
/// of the same value replaces the old record instead of sitting next to it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageEntryMetadata {
    pub key: NodeId,
    pub owner: String,
    pub kind: String,
    /// SHA-256 of the value, hex encoded
    pub content_hash: String,
    /// `last_updated` of the stored content
    pub last_updated: i64,
    /// Last time this value was pushed to (or received from) the network
    pub last_republished: i64,
}

impl StorageEntryMetadata {
    pub fn new(content: &Content) -> Self {
        let digest = ring::digest::digest(&ring::digest::SHA256, &content.value);

        Self {
            key: content.key,
            owner: content.owner.clone(),
            kind: content.kind.clone(),
            content_hash: hex::encode(digest.as_ref()),
            last_updated: content.last_updated,
            last_republished: now_secs(),
        }
    }

    pub fn update_last_republished(&mut self) {
        self.last_republished = now_secs();
    }

    /// Whether this entry matches the given search criteria
    pub fn satisfies(&self, params: &GetParameter) -> bool {
        self.key == params.key && self.owner == params.owner && self.kind == params.kind
    }

    /// Stable name of the blob holding this entry, derived from `(key, owner, kind)`
    pub fn identity_hash(&self) -> String {
        let mut ctx = ring::digest::Context::new(&ring::digest::SHA256);
        ctx.update(&self.key.0);
        ctx.update(&(self.owner.len() as u64).to_be_bytes());
        ctx.update(self.owner.as_bytes());
        ctx.update(self.kind.as_bytes());
        let digest = ctx.finish();

        hex::encode(&digest.as_ref()[..8])
    }
}

impl PartialEq for StorageEntryMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.owner == other.owner && self.kind == other.kind
    }
}

impl Eq for StorageEntryMetadata {}

impl Hash for StorageEntryMetadata {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.owner.hash(state);
        self.kind.hash(state);
    }
}

impl fmt::Display for StorageEntryMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entry: {} owner: {} type: {} last updated: {}",
            self.key.short(),
            self.owner,
            self.kind,
            self.last_updated
        )
    }
}

/// Content plus its metadata, as stored and as sent in STORE/CONTENT messages
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageEntry {
    pub content: Content,
    pub metadata: StorageEntryMetadata,
}

impl StorageEntry {
    pub fn new(content: Content) -> Self {
        let metadata = StorageEntryMetadata::new(&content);
        Self { content, metadata }
    }
}

impl From<Content> for StorageEntry {
    fn from(content: Content) -> Self {
        Self::new(content)
    }
}
