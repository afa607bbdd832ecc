//! DHT operations
//!
//! Every operation is an independent future over a shared [`DhtContext`].

mod connect;
mod find_node;
mod find_value;
mod lookup;
mod refresh;
mod store;

pub use connect::connect;
pub use find_node::find_node;
pub use find_value::{find_value, FindValueResult};
pub use lookup::{Lookup, LookupTable, NodeStatus};
pub use refresh::{bucket_refresh, content_refresh, kad_refresh};
pub use store::store;

use crate::dht::network::DhtNetwork;
use crate::dht::stats::NodeStats;
use crate::dht::{ContentStore, KademliaConfig, NodeInfo, RoutingTable};

/// Everything an operation needs, shared by the node, its handler and its timers
pub struct DhtContext {
    pub owner: String,
    pub local: NodeInfo,
    pub config: KademliaConfig,
    pub network: DhtNetwork,
    pub routing: RoutingTable,
    pub storage: ContentStore,
    pub stats: NodeStats,
}
