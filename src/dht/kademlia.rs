use crate::dht::handler::spawn_message_handler;
use crate::dht::network::DhtNetwork;
use crate::dht::operations::{self, DhtContext};
use crate::dht::routing::RoutingSnapshot;
use crate::dht::state::{content_dir, NodeState};
use crate::dht::stats::{NodeStats, StatsSnapshot};
use crate::dht::storage::{BlobStore, FileBlobStore, MemoryBlobStore, StorageError};
use crate::dht::{Content, ContentStore, GetParameter, NodeId, NodeInfo, RoutingTable, StorageEntry};
use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum KademliaError {
    #[error("Invalid node ID: {0}")]
    InvalidNodeId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Network is not running")]
    NetworkDown,

    #[error("No response from peer")]
    NoResponse,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("DHT operation failed: {0}")]
    OperationFailed(String),
}

/// Configuration for the Kademlia DHT
#[derive(Debug, Clone)]
pub struct KademliaConfig {
    /// The number of nodes to keep in each k-bucket
    pub k_value: usize,
    /// The number of nodes to query in parallel during lookups
    pub alpha_value: usize,
    /// How long to wait for a reply to a single request
    pub response_timeout: Duration,
    /// Upper bound on a whole lookup
    pub operation_timeout: Duration,
    /// The interval for refreshing buckets and content
    pub refresh_interval: Duration,
    /// Content last republished longer ago than this is pushed out again
    pub republish_interval: Duration,
    /// How many times CONNECT is sent before giving up
    pub max_connect_attempts: usize,
    /// Consecutive failures after which a contact is evicted
    pub stale_limit: u32,
    /// Largest datagram the transport will send or accept
    pub max_datagram_size: usize,
    /// Unsolicited messages queued for the handler; more are dropped
    pub inbound_queue_size: usize,
    /// Where node state and content go; in memory only when unset
    pub data_dir: Option<PathBuf>,
}

impl Default for KademliaConfig {
    fn default() -> Self {
        Self {
            k_value: 20,
            alpha_value: 3,
            response_timeout: Duration::from_secs(2),
            operation_timeout: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(3600), // 1 hour
            republish_interval: Duration::from_secs(3600), // 1 hour
            max_connect_attempts: 5,
            stale_limit: 1,
            max_datagram_size: 64 * 1024,
            inbound_queue_size: 1000,
            data_dir: None,
        }
    }
}

/// Implementation of the Kademlia DHT node
pub struct KademliaNode {
    /// 共享的节点上下文
    ctx: Arc<DhtContext>,

    /// 消息处理和定时刷新任务
    tasks: Vec<JoinHandle<()>>,
}

impl KademliaNode {
    /// Starts a fresh node listening on `bind_addr`
    pub async fn start(
        owner: &str,
        id: NodeId,
        bind_addr: SocketAddr,
        config: KademliaConfig,
    ) -> Result<Self, KademliaError> {
        Self::launch(owner, id, bind_addr, config, None).await
    }

    /// Restarts a node from the state saved by `shutdown(true)`.
    ///
    /// Returns `None` when no data directory is configured or nothing was saved.
    pub async fn load(owner: &str, bind_addr: SocketAddr, config: KademliaConfig) -> Result<Option<Self>, KademliaError> {
        let Some(data_dir) = config.data_dir.clone() else {
            return Ok(None);
        };
        let Some(state) = NodeState::load(&data_dir, owner)? else {
            return Ok(None);
        };

        let id = state.local.id;
        Self::launch(owner, id, bind_addr, config, Some(state)).await.map(Some)
    }

    async fn launch(
        owner: &str,
        id: NodeId,
        bind_addr: SocketAddr,
        config: KademliaConfig,
        state: Option<NodeState>,
    ) -> Result<Self, KademliaError> {
        let (network, inbound) = DhtNetwork::bind(bind_addr, &config).await?;
        let local = NodeInfo::new(id, network.local_addr());

        let (routing, content) = match state {
            Some(state) => {
                let snapshot = RoutingSnapshot {
                    local,
                    contacts: state.routing.contacts,
                };
                let routing = RoutingTable::from_snapshot(snapshot, config.k_value, config.stale_limit);
                (routing, state.content)
            }
            None => (RoutingTable::new(local, config.k_value, config.stale_limit), Vec::new()),
        };

        let blobs: Box<dyn BlobStore> = match &config.data_dir {
            Some(dir) => Box::new(FileBlobStore::new(content_dir(dir, owner))?),
            None => Box::new(MemoryBlobStore::new()),
        };
        let storage = ContentStore::new(owner, blobs);
        if !content.is_empty() {
            storage.restore_index(content).await;
        }

        let ctx = Arc::new(DhtContext {
            owner: owner.to_string(),
            local,
            config,
            network,
            routing,
            storage,
            stats: NodeStats::default(),
        });

        ctx.network.start();

        let tasks = vec![
            spawn_message_handler(ctx.clone(), inbound),
            spawn_refresh_timer(ctx.clone()),
        ];

        info!("Kademlia node {} ({}) started on {}", owner, id.short(), local.addr);

        Ok(Self { ctx, tasks })
    }

    /// Joins the network through a known peer
    pub async fn bootstrap(&self, peer: &NodeInfo) -> Result<(), KademliaError> {
        if peer.id == self.ctx.local.id {
            return Err(KademliaError::OperationFailed("Cannot bootstrap from self".to_string()));
        }

        operations::connect(&self.ctx, peer).await
    }

    /// Stores content on the K nodes closest to its key, returns how many accepted it
    pub async fn put(&self, content: Content) -> usize {
        operations::store(&self.ctx, &StorageEntry::new(content)).await
    }

    /// Stores content on this node only; `false` when a newer copy is already here
    pub async fn put_locally(&self, content: Content) -> bool {
        self.ctx.storage.store(&StorageEntry::new(content)).await
    }

    /// Looks content up, locally first, then through the network
    pub async fn get(&self, params: &GetParameter) -> Option<StorageEntry> {
        if let Some(entry) = self.ctx.storage.get(params).await {
            return Some(entry);
        }

        let started = Instant::now();
        let result = operations::find_value(&self.ctx, params).await;
        self.ctx
            .stats
            .record_lookup(started.elapsed(), result.route_length, result.entry.is_some());

        result.entry
    }

    /// 查找节点
    pub async fn find_node(&self, target: &NodeId) -> Vec<NodeInfo> {
        operations::find_node(&self.ctx, target).await
    }

    /// Refreshes buckets and republishes content now
    pub async fn refresh(&self) {
        operations::kad_refresh(&self.ctx).await;
    }

    /// Stops the node, saving its state first when `persist` is set
    pub async fn shutdown(&self, persist: bool) -> Result<(), KademliaError> {
        let saved = if persist { self.save_state().await } else { Ok(()) };

        self.ctx.network.shutdown().await;
        for task in &self.tasks {
            task.abort();
        }

        info!("Kademlia node {} stopped", self.ctx.owner);
        saved
    }

    async fn save_state(&self) -> Result<(), KademliaError> {
        let data_dir = self
            .ctx
            .config
            .data_dir
            .as_ref()
            .ok_or_else(|| KademliaError::Persistence("No data directory configured".to_string()))?;

        let state = NodeState {
            owner: self.ctx.owner.clone(),
            local: self.ctx.local,
            routing: self.ctx.routing.snapshot().await,
            content: self.ctx.storage.entries().await,
        };

        state.save(data_dir)
    }

    /// 获取本地节点信息
    pub fn local_node(&self) -> &NodeInfo {
        &self.ctx.local
    }

    pub fn owner(&self) -> &str {
        &self.ctx.owner
    }

    pub fn config(&self) -> &KademliaConfig {
        &self.ctx.config
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.ctx.routing
    }

    pub fn storage(&self) -> &ContentStore {
        &self.ctx.storage
    }

    pub fn is_running(&self) -> bool {
        self.ctx.network.is_running()
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot::collect(self.ctx.network.stats(), &self.ctx.stats)
    }
}

/// 定期刷新bucket和内容，网络停止时退出
fn spawn_refresh_timer(ctx: Arc<DhtContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = ctx.config.refresh_interval.max(Duration::from_secs(1));
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    info!("[{}] running periodic refresh", ctx.local.id.short());
                    operations::kad_refresh(&ctx).await;
                }
                _ = ctx.network.closed() => break,
            }
        }
    })
}

impl Drop for KademliaNode {
    fn drop(&mut self) {
        if self.ctx.network.close() {
            warn!("Kademlia node {} dropped without shutdown", self.ctx.owner);
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}
