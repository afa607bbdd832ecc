use crate::dht::node_id::ID_BITS;
use crate::dht::{now_secs, NodeId, NodeInfo};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::Mutex;

/// 路由表中的联系人：节点信息加上活跃度元数据
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contact {
    /// 节点信息
    pub node: NodeInfo,

    /// 最后一次看到该节点的时间（unix秒）
    pub last_seen: i64,

    /// 连续未响应的次数
    pub stale_count: u32,
}

impl Contact {
    pub fn new(node: NodeInfo) -> Self {
        Self {
            node,
            last_seen: now_secs(),
            stale_count: 0,
        }
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}:{{lastSeen:{}, staleCount:{}}}}}",
            self.node, self.last_seen, self.stale_count
        )
    }
}

/// 插入bucket的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketInsert {
    /// 新节点已加入
    Added,
    /// 节点已存在，已刷新
    Refreshed,
    /// bucket已满，替换了一个不活跃的节点
    Replaced,
    /// bucket已满且没有可替换的节点，新节点被丢弃
    Dropped,
}

/// k-bucket：按最久未见到最近看到排序的联系人
#[derive(Debug, Clone)]
pub struct KBucket {
    /// bucket的深度（距离类别 - 1）
    depth: usize,

    /// 联系人，队首为最久未见的节点
    contacts: VecDeque<Contact>,

    /// 最大容量 (k值)
    capacity: usize,
}

impl KBucket {
    pub fn new(depth: usize, capacity: usize) -> Self {
        Self {
            depth,
            contacts: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 添加或刷新联系人
    ///
    /// 已存在的节点移到队尾并重置失败计数；bucket已满时替换失败次数最多的节点
    /// （失败次数相同时取最久未见的），没有失败过的节点时丢弃新节点。
    pub fn insert(&mut self, mut contact: Contact) -> BucketInsert {
        if let Some(pos) = self.position(&contact.node.id) {
            if let Some(mut existing) = self.contacts.remove(pos) {
                existing.node.addr = contact.node.addr;
                existing.last_seen = existing.last_seen.max(contact.last_seen);
                existing.stale_count = 0;
                self.contacts.push_back(existing);
            }
            return BucketInsert::Refreshed;
        }

        contact.stale_count = 0;

        if self.contacts.len() < self.capacity {
            self.contacts.push_back(contact);
            return BucketInsert::Added;
        }

        let mut victim: Option<(usize, u32)> = None;
        for (i, c) in self.contacts.iter().enumerate() {
            if c.stale_count == 0 {
                continue;
            }
            match victim {
                Some((_, worst)) if worst >= c.stale_count => {}
                _ => victim = Some((i, c.stale_count)),
            }
        }

        match victim {
            Some((pos, _)) => {
                self.contacts.remove(pos);
                self.contacts.push_back(contact);
                BucketInsert::Replaced
            }
            None => BucketInsert::Dropped,
        }
    }

    /// 记录一次失败，达到上限时移除；返回是否已移除
    pub fn mark_stale(&mut self, id: &NodeId, stale_limit: u32) -> bool {
        let Some(pos) = self.position(id) else {
            return false;
        };

        let contact = &mut self.contacts[pos];
        contact.stale_count += 1;

        if contact.stale_count >= stale_limit.max(1) {
            self.contacts.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.position(id).is_some()
    }

    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.iter()
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    fn position(&self, id: &NodeId) -> Option<usize> {
        self.contacts.iter().position(|c| c.node.id == *id)
    }
}

/// 路由表的可序列化快照
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingSnapshot {
    /// 本地节点
    pub local: NodeInfo,

    /// 所有联系人
    pub contacts: Vec<Contact>,
}

/// 路由表实现，基于Kademlia的k-bucket结构
///
/// 每个bucket各自加锁，调用方只能通过这里的方法访问bucket。
pub struct RoutingTable {
    /// 本地节点
    local: NodeInfo,

    /// k-buckets，下标为距离减一
    buckets: Vec<Mutex<KBucket>>,

    /// 连续失败多少次后移除联系人
    stale_limit: u32,
}

impl RoutingTable {
    /// 创建新的路由表，并把本地节点放入其中
    pub fn new(local: NodeInfo, bucket_size: usize, stale_limit: u32) -> Self {
        Self::from_snapshot(
            RoutingSnapshot {
                local,
                contacts: Vec::new(),
            },
            bucket_size,
            stale_limit,
        )
    }

    /// 从快照恢复路由表
    pub fn from_snapshot(snapshot: RoutingSnapshot, bucket_size: usize, stale_limit: u32) -> Self {
        let local = snapshot.local;
        let mut buckets: Vec<KBucket> = (0..ID_BITS).map(|depth| KBucket::new(depth, bucket_size)).collect();

        buckets[0].insert(Contact::new(local));
        for contact in snapshot.contacts {
            let idx = bucket_index(&local.id, &contact.node.id);
            buckets[idx].insert(contact);
        }

        Self {
            local,
            buckets: buckets.into_iter().map(Mutex::new).collect(),
            stale_limit,
        }
    }

    /// 本地节点
    pub fn local(&self) -> &NodeInfo {
        &self.local
    }

    /// 添加或更新节点
    pub async fn insert(&self, node: NodeInfo) -> BucketInsert {
        self.insert_contact(Contact::new(node)).await
    }

    /// 添加联系人，保留其last_seen
    pub async fn insert_contact(&self, contact: Contact) -> BucketInsert {
        let node = contact.node;
        let idx = bucket_index(&self.local.id, &node.id);
        let outcome = self.buckets[idx].lock().await.insert(contact);

        match outcome {
            BucketInsert::Added | BucketInsert::Replaced => {
                debug!("[{}] {:?} contact {} into bucket {}", self.local.id.short(), outcome, node, idx)
            }
            _ => trace!("[{}] {:?} contact {}", self.local.id.short(), outcome, node),
        }

        outcome
    }

    /// 获取路由表中的所有节点（副本）
    pub async fn all_nodes(&self) -> Vec<NodeInfo> {
        let mut nodes = Vec::new();
        for bucket in &self.buckets {
            nodes.extend(bucket.lock().await.contacts().map(|c| c.node));
        }
        nodes
    }

    /// 获取路由表中的所有联系人（副本）
    pub async fn all_contacts(&self) -> Vec<Contact> {
        let mut contacts = Vec::new();
        for bucket in &self.buckets {
            contacts.extend(bucket.lock().await.contacts().cloned());
        }
        contacts
    }

    /// 获取离目标最近的count个节点，按距离升序
    pub async fn find_closest(&self, target: &NodeId, count: usize) -> Vec<NodeInfo> {
        let mut nodes = self.all_nodes().await;
        nodes.sort_by(|a, b| target.cmp_distance(&a.id, &b.id));
        nodes.truncate(count);
        nodes
    }

    /// 通知路由表某个节点未响应
    pub async fn mark_unresponsive(&self, node: &NodeInfo) {
        if node.id == self.local.id {
            return;
        }

        let idx = bucket_index(&self.local.id, &node.id);
        if self.buckets[idx].lock().await.mark_stale(&node.id, self.stale_limit) {
            debug!("[{}] removed unresponsive contact {}", self.local.id.short(), node);
        }
    }

    /// 批量通知未响应的节点
    pub async fn mark_unresponsive_all(&self, nodes: &[NodeInfo]) {
        for node in nodes {
            self.mark_unresponsive(node).await;
        }
    }

    /// 路由表中是否有该节点
    pub async fn contains(&self, id: &NodeId) -> bool {
        let idx = bucket_index(&self.local.id, id);
        self.buckets[idx].lock().await.contains(id)
    }

    /// 获取路由表中的节点总数（包括本地节点）
    pub async fn len(&self) -> usize {
        let mut total = 0;
        for bucket in &self.buckets {
            total += bucket.lock().await.len();
        }
        total
    }

    /// 除本地节点外是否没有其他节点
    pub async fn is_empty(&self) -> bool {
        self.len().await <= 1
    }

    /// 生成快照（不含本地节点本身）
    pub async fn snapshot(&self) -> RoutingSnapshot {
        let contacts = self
            .all_contacts()
            .await
            .into_iter()
            .filter(|c| c.node.id != self.local.id)
            .collect();

        RoutingSnapshot {
            local: self.local,
            contacts,
        }
    }

    /// 可读的路由表描述
    pub async fn describe(&self) -> String {
        let mut out = String::new();
        let mut total = 0;

        for bucket in &self.buckets {
            let bucket = bucket.lock().await;
            if bucket.is_empty() {
                continue;
            }
            total += bucket.len();
            out.push_str(&format!("Bucket at depth {}:\n", bucket.depth()));
            for contact in bucket.contacts() {
                out.push_str(&format!("  {}\n", contact));
            }
        }

        out.push_str(&format!("Total contacts: {}", total));
        out
    }
}

/// 计算节点应该放入哪个bucket；本地节点自己放在0号bucket
pub fn bucket_index(local: &NodeId, id: &NodeId) -> usize {
    local.distance(id).saturating_sub(1)
}
