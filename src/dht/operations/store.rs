use crate::dht::operations::{find_node, DhtContext};
use crate::dht::protocol::Message;
use crate::dht::StorageEntry;
use log::{debug, info};

/// 把内容存到离其键最近的k个节点上，返回（乐观的）存储节点数
pub async fn store(ctx: &DhtContext, entry: &StorageEntry) -> usize {
    let nodes = find_node(ctx, &entry.metadata.key).await;
    let mut stored = 0;

    for node in &nodes {
        if node.id == ctx.local.id {
            if !ctx.storage.store(entry).await {
                debug!("[{}] local copy of {} already up to date", ctx.local.id.short(), entry.metadata.key.short());
            }
            stored += 1;
            continue;
        }

        let message = Message::Store {
            origin: ctx.local,
            entry: entry.clone(),
        };
        if ctx.network.send(node.addr, message, None).await.is_some() {
            stored += 1;
        }
    }

    info!("[{}] stored {} on {} nodes", ctx.local.id.short(), entry.metadata.key.short(), stored);
    stored
}
