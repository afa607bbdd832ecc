use crate::dht::network::{Outcome, Responder, Response};
use crate::dht::operations::DhtContext;
use crate::dht::protocol::Message;
use crate::dht::{NodeId, NodeInfo};
use log::debug;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

/// 查找过程中一个节点的状态，只能按 `Unasked → Awaiting → {Asked | Failed}` 前进
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Unasked,
    Awaiting,
    Asked,
    Failed,
}

impl NodeStatus {
    fn can_become(self, next: NodeStatus) -> bool {
        use NodeStatus::*;

        matches!(
            (self, next),
            (Unasked, Awaiting) | (Unasked, Asked) | (Awaiting, Asked) | (Awaiting, Failed)
        )
    }
}

#[derive(Debug, Clone)]
struct LookupEntry {
    node: NodeInfo,
    status: NodeStatus,
    /// 第几轮得知该节点，种子节点为第1轮
    round: usize,
}

/// 单次查找的节点状态表，按到目标的XOR距离排序
#[derive(Debug)]
pub struct LookupTable {
    target: NodeId,
    k: usize,
    entries: BTreeMap<NodeId, LookupEntry>,
    route_length: usize,
}

impl LookupTable {
    pub fn new(target: NodeId, k: usize) -> Self {
        Self {
            target,
            k,
            entries: BTreeMap::new(),
            route_length: 1,
        }
    }

    /// 加入节点，已存在时不做任何事
    pub fn add(&mut self, node: NodeInfo, round: usize) -> bool {
        let distance = self.target.xor(&node.id);
        if self.entries.contains_key(&distance) {
            return false;
        }

        self.entries.insert(
            distance,
            LookupEntry {
                node,
                status: NodeStatus::Unasked,
                round,
            },
        );
        true
    }

    /// 把某节点回复中带来的节点加入表中，轮次为该节点的轮次加一
    pub fn add_from_reply(&mut self, sender: &NodeId, nodes: Vec<NodeInfo>) {
        let round = self.round(sender).unwrap_or(1) + 1;
        self.route_length = self.route_length.max(round);

        for node in nodes {
            self.add(node, round);
        }
    }

    /// 修改状态，不合法的回退会被忽略
    pub fn set_status(&mut self, id: &NodeId, status: NodeStatus) -> bool {
        match self.entries.get_mut(&self.target.xor(id)) {
            Some(entry) if entry.status.can_become(status) => {
                entry.status = status;
                true
            }
            _ => false,
        }
    }

    pub fn status(&self, id: &NodeId) -> Option<NodeStatus> {
        self.entries.get(&self.target.xor(id)).map(|e| e.status)
    }

    pub fn round(&self, id: &NodeId) -> Option<usize> {
        self.entries.get(&self.target.xor(id)).map(|e| e.round)
    }

    pub fn route_length(&self) -> usize {
        self.route_length
    }

    /// 最近的k个未失败节点中，最多limit个尚未询问的
    pub fn next_unasked(&self, limit: usize) -> Vec<NodeInfo> {
        self.closest_alive()
            .filter(|e| e.status == NodeStatus::Unasked)
            .take(limit)
            .map(|e| e.node)
            .collect()
    }

    /// 最近的k个未失败节点是否都已询问
    pub fn is_complete(&self) -> bool {
        self.closest_alive().all(|e| e.status == NodeStatus::Asked)
    }

    /// 最近的k个已回复节点
    pub fn closest_asked(&self) -> Vec<NodeInfo> {
        self.entries
            .values()
            .filter(|e| e.status == NodeStatus::Asked)
            .take(self.k)
            .map(|e| e.node)
            .collect()
    }

    pub fn failed(&self) -> Vec<NodeInfo> {
        self.entries
            .values()
            .filter(|e| e.status == NodeStatus::Failed)
            .map(|e| e.node)
            .collect()
    }

    fn closest_alive(&self) -> impl Iterator<Item = &LookupEntry> {
        self.entries
            .values()
            .filter(|e| e.status != NodeStatus::Failed)
            .take(self.k)
    }
}

/// 迭代查找的驱动：最多alpha个请求同时在途，只在收到响应、超过总时限或网络关闭时醒来
///
/// 节点失败时立即报告给路由表，并发的其他查找不会再选中它。
pub struct Lookup<'a> {
    ctx: &'a DhtContext,
    table: LookupTable,
    request: Message,
    awaiting: HashMap<u32, NodeInfo>,
    /// 已经报告给路由表的失败节点
    reported: HashSet<NodeId>,
    responder: Responder,
    responses: mpsc::UnboundedReceiver<Response>,
    deadline: Instant,
}

impl<'a> Lookup<'a> {
    /// 用路由表中的所有节点作为种子，本地节点直接视为已询问
    pub async fn new(ctx: &'a DhtContext, target: NodeId, request: Message) -> Lookup<'a> {
        let mut table = LookupTable::new(target, ctx.config.k_value);
        for node in ctx.routing.all_nodes().await {
            table.add(node, 1);
        }
        table.add(ctx.local, 1);
        table.set_status(&ctx.local.id, NodeStatus::Asked);

        let (responder, responses) = mpsc::unbounded_channel();

        Lookup {
            ctx,
            table,
            request,
            awaiting: HashMap::new(),
            reported: HashSet::new(),
            responder,
            responses,
            deadline: Instant::now() + ctx.config.operation_timeout,
        }
    }

    /// 等待下一个回复；查找结束时返回None
    pub async fn next_reply(&mut self) -> Option<(NodeInfo, Message)> {
        loop {
            self.dispatch().await;

            if self.awaiting.is_empty() {
                if !self.table.is_complete() {
                    debug!("[{}] lookup for {} stopped early", self.ctx.local.id.short(), self.table.target.short());
                }
                return None;
            }

            let response = tokio::select! {
                response = self.responses.recv() => response?,
                _ = sleep_until(self.deadline) => {
                    debug!(
                        "[{}] lookup for {} hit its deadline with {} requests in flight",
                        self.ctx.local.id.short(),
                        self.table.target.short(),
                        self.awaiting.len()
                    );
                    return None;
                }
                _ = self.ctx.network.closed() => return None,
            };

            let Some(node) = self.awaiting.remove(&response.conversation_id) else {
                continue;
            };

            match response.outcome {
                Outcome::Reply(message) => return Some((node, message)),
                Outcome::Timeout => {
                    debug!("[{}] no answer from {}", self.ctx.local.id.short(), node);
                    self.fail(&node).await;
                }
            }
        }
    }

    /// 记录一个有效回复：发送者进入路由表，回复中的节点进入状态表
    pub async fn accept(&mut self, node: &NodeInfo, nodes: Vec<NodeInfo>) {
        self.ctx.routing.insert(*node).await;
        self.table.set_status(&node.id, NodeStatus::Asked);
        self.table.add_from_reply(&node.id, nodes);
    }

    /// 回复类型不对，按失败处理
    pub async fn reject(&mut self, node: &NodeInfo, message: &Message) {
        debug!(
            "[{}] unexpected {} from {}",
            self.ctx.local.id.short(),
            message.name(),
            node
        );
        self.fail(node).await;
    }

    pub fn route_length(&self) -> usize {
        self.table.route_length()
    }

    /// 把还没报告的失败节点报告给路由表，返回最近的k个已回复节点
    pub async fn finish(self) -> Vec<NodeInfo> {
        let unreported: Vec<NodeInfo> = self
            .table
            .failed()
            .into_iter()
            .filter(|n| !self.reported.contains(&n.id))
            .collect();
        if !unreported.is_empty() && self.ctx.network.is_running() {
            self.ctx.routing.mark_unresponsive_all(&unreported).await;
        }

        self.table.closest_asked()
    }

    /// 标记失败并立即从路由表中移除；网络已停止时只在本次查找中标记
    async fn fail(&mut self, node: &NodeInfo) {
        self.table.set_status(&node.id, NodeStatus::Failed);

        if self.ctx.network.is_running() && self.reported.insert(node.id) {
            self.ctx.routing.mark_unresponsive(node).await;
        }
    }

    async fn dispatch(&mut self) {
        let alpha = self.ctx.config.alpha_value.max(1);

        while self.awaiting.len() < alpha && self.ctx.network.is_running() {
            let batch = self.table.next_unasked(alpha - self.awaiting.len());
            if batch.is_empty() {
                break;
            }

            for node in batch {
                self.table.set_status(&node.id, NodeStatus::Awaiting);

                let sent = self
                    .ctx
                    .network
                    .send(node.addr, self.request.clone(), Some(self.responder.clone()))
                    .await;

                match sent {
                    Some(conversation_id) => {
                        self.awaiting.insert(conversation_id, node);
                    }
                    None => self.fail(&node).await,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::node_id::ID_BYTES;

    fn node(first: u8) -> NodeInfo {
        let mut id = [0u8; ID_BYTES];
        id[0] = first;
        NodeInfo::new(NodeId(id), format!("127.0.0.1:{}", 5000 + first as u16).parse().unwrap())
    }

    #[test]
    fn test_next_unasked_respects_k_and_limit() {
        let mut table = LookupTable::new(NodeId::ZERO, 3);
        for i in 1..=6 {
            table.add(node(i), 1);
        }

        let next: Vec<u8> = table.next_unasked(2).iter().map(|n| n.id.0[0]).collect();
        assert_eq!(next, vec![1, 2]);

        let all: Vec<u8> = table.next_unasked(10).iter().map(|n| n.id.0[0]).collect();
        assert_eq!(all, vec![1, 2, 3]);
    }

    #[test]
    fn test_failed_nodes_make_room() {
        let mut table = LookupTable::new(NodeId::ZERO, 2);
        for i in 1..=4 {
            table.add(node(i), 1);
        }

        table.set_status(&node(1).id, NodeStatus::Awaiting);
        table.set_status(&node(1).id, NodeStatus::Failed);

        let next: Vec<u8> = table.next_unasked(10).iter().map(|n| n.id.0[0]).collect();
        assert_eq!(next, vec![2, 3]);
        assert_eq!(table.failed(), vec![node(1)]);
    }

    #[test]
    fn test_status_is_monotonic() {
        let mut table = LookupTable::new(NodeId::ZERO, 2);
        let n = node(1);
        table.add(n, 1);

        assert!(!table.set_status(&n.id, NodeStatus::Failed));
        assert!(table.set_status(&n.id, NodeStatus::Awaiting));
        assert!(table.set_status(&n.id, NodeStatus::Asked));
        assert!(!table.set_status(&n.id, NodeStatus::Failed));
        assert!(!table.set_status(&n.id, NodeStatus::Unasked));
        assert_eq!(table.status(&n.id), Some(NodeStatus::Asked));
    }

    #[test]
    fn test_completion() {
        let mut table = LookupTable::new(NodeId::ZERO, 2);
        for i in 1..=3 {
            table.add(node(i), 1);
        }
        assert!(!table.is_complete());

        for i in 1..=2 {
            table.set_status(&node(i).id, NodeStatus::Awaiting);
            table.set_status(&node(i).id, NodeStatus::Asked);
        }
        assert!(table.is_complete());
        assert_eq!(table.closest_asked(), vec![node(1), node(2)]);
    }

    #[test]
    fn test_route_length() {
        let mut table = LookupTable::new(NodeId::ZERO, 5);
        table.add(node(10), 1);
        assert_eq!(table.route_length(), 1);

        table.add_from_reply(&node(10).id, vec![node(5), node(10)]);
        assert_eq!(table.round(&node(5).id), Some(2));
        assert_eq!(table.round(&node(10).id), Some(1));

        table.add_from_reply(&node(5).id, vec![node(2)]);
        assert_eq!(table.round(&node(2).id), Some(3));
        assert_eq!(table.route_length(), 3);
    }
}
