use crate::dht::operations::{DhtContext, Lookup};
use crate::dht::protocol::Message;
use crate::dht::{NodeId, NodeInfo};
use log::debug;

/// 查找离目标最近的k个节点
pub async fn find_node(ctx: &DhtContext, target: &NodeId) -> Vec<NodeInfo> {
    let request = Message::FindNode {
        origin: ctx.local,
        target: *target,
    };
    let mut lookup = Lookup::new(ctx, *target, request).await;

    while let Some((node, reply)) = lookup.next_reply().await {
        match reply {
            Message::FindNodeReply { nodes, .. } => lookup.accept(&node, nodes).await,
            other => lookup.reject(&node, &other).await,
        }
    }

    let closest = lookup.finish().await;
    debug!(
        "[{}] node lookup for {} completed, found {} nodes",
        ctx.local.id.short(),
        target.short(),
        closest.len()
    );

    closest
}
