use crate::dht::routing::RoutingSnapshot;
use crate::dht::{KademliaError, NodeInfo, StorageEntryMetadata};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const STATE_DIR: &str = "nodeState";
const STATE_FILE: &str = "state.json";
const CONTENT_DIR: &str = "content";

/// Everything a node needs to come back after a restart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub owner: String,
    pub local: NodeInfo,
    pub routing: RoutingSnapshot,
    pub content: Vec<StorageEntryMetadata>,
}

impl NodeState {
    /// Loads the saved state of `owner`, `None` when nothing was saved
    pub fn load(data_dir: &Path, owner: &str) -> Result<Option<Self>, KademliaError> {
        let path = state_file(data_dir, owner);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No saved state at {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let state: NodeState = serde_json::from_slice(&bytes)
            .map_err(|e| KademliaError::Persistence(format!("{}: {}", path.display(), e)))?;

        info!("Loaded state of {} from {}", owner, path.display());
        Ok(Some(state))
    }

    pub fn save(&self, data_dir: &Path) -> Result<(), KademliaError> {
        let path = state_file(data_dir, &self.owner);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = serde_json::to_vec_pretty(self).map_err(|e| KademliaError::Persistence(e.to_string()))?;
        fs::write(&path, bytes)?;

        info!("Saved state of {} to {}", self.owner, path.display());
        Ok(())
    }
}

/// Root directory of one owner's data
pub fn node_dir(data_dir: &Path, owner: &str) -> PathBuf {
    data_dir.join(owner)
}

/// Directory holding one owner's content blobs
pub fn content_dir(data_dir: &Path, owner: &str) -> PathBuf {
    node_dir(data_dir, owner).join(CONTENT_DIR)
}

fn state_file(data_dir: &Path, owner: &str) -> PathBuf {
    node_dir(data_dir, owner).join(STATE_DIR).join(STATE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::routing::Contact;
    use crate::dht::{Content, NodeId};

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let local = NodeInfo::new(NodeId::random(), "127.0.0.1:4000".parse().unwrap());
        let peer = NodeInfo::new(NodeId::random(), "127.0.0.1:4001".parse().unwrap());
        let content = Content::with_random_key("alice", b"saved".to_vec());

        let state = NodeState {
            owner: "alice".to_string(),
            local,
            routing: RoutingSnapshot {
                local,
                contacts: vec![Contact::new(peer)],
            },
            content: vec![StorageEntryMetadata::new(&content)],
        };
        state.save(dir.path()).unwrap();

        assert!(dir.path().join("alice").join("nodeState").join("state.json").is_file());

        let loaded = NodeState::load(dir.path(), "alice").unwrap().unwrap();
        assert_eq!(loaded.local.id, local.id);
        assert_eq!(loaded.routing.contacts.len(), 1);
        assert_eq!(loaded.routing.contacts[0].node.id, peer.id);
        assert_eq!(loaded.content[0].key, content.key);
    }

    #[test]
    fn test_load_missing_state() {
        let dir = tempfile::tempdir().unwrap();
        assert!(NodeState::load(dir.path(), "nobody").unwrap().is_none());
    }

    #[test]
    fn test_load_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bob").join("nodeState");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("state.json"), b"not json").unwrap();

        assert!(matches!(
            NodeState::load(dir.path(), "bob"),
            Err(KademliaError::Persistence(_))
        ));
    }
}
