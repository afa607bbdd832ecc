mod bootstrap;
mod content;
mod handler;
mod kademlia;
mod network;
mod node_id;
pub mod operations;
mod protocol;
mod routing;
mod state;
mod stats;
mod storage;
mod validation;

pub use bootstrap::{parse_bootstrap_node, BootstrapConfig};
pub use content::{Content, GetParameter, StorageEntry, StorageEntryMetadata, DEFAULT_KIND};
pub use kademlia::{KademliaConfig, KademliaError, KademliaNode};
pub use network::{DhtNetwork, Outcome, Responder, Response};
pub use node_id::{NodeId, NodeInfo, ID_BITS, ID_BYTES};
pub use protocol::{Message, MessageRoute, Packet};
pub use routing::{bucket_index, BucketInsert, Contact, KBucket, RoutingSnapshot, RoutingTable};
pub use state::NodeState;
pub use stats::StatsSnapshot;
pub use storage::{BlobStore, ContentIndex, ContentStore, FileBlobStore, MemoryBlobStore, StorageError, StorageKey};
pub use validation::validate_node_id;

/*
 * Kademlia distributed hash table
 *
 * A node keeps a routing table of peers ordered by XOR distance and talks
 * to them over UDP datagrams:
 *
 * 1. FIND_NODE / FIND_VALUE - iterative lookups with at most alpha requests in flight
 * 2. STORE - replicate content to the K closest nodes
 * 3. CONNECT - join the network through a known peer
 *
 * Buckets and content are refreshed on a timer.
 */

/// Current time in unix seconds
pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
