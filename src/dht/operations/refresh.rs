use crate::dht::node_id::ID_BITS;
use crate::dht::operations::{find_node, DhtContext};
use crate::dht::protocol::Message;
use crate::dht::now_secs;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::task::JoinSet;

/// 对每个距离类别查找一个随机ID，填充对应的bucket
pub async fn bucket_refresh(ctx: &Arc<DhtContext>) {
    let mut tasks = JoinSet::new();

    for distance in 1..=ID_BITS {
        let ctx = ctx.clone();
        let target = ctx.local.id.at_distance(distance);
        tasks.spawn(async move {
            find_node(&ctx, &target).await;
        });
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            warn!("[{}] bucket refresh task failed: {}", ctx.local.id.short(), e);
        }
    }

    debug!("[{}] bucket refresh done, {} contacts", ctx.local.id.short(), ctx.routing.len().await);
}

/// 把到期的内容重新发布给离它最近的k个节点，本地不再是其中之一时删除本地副本
pub async fn content_refresh(ctx: &DhtContext) {
    let cutoff = now_secs() - ctx.config.republish_interval.as_secs() as i64;
    let mut republished = 0;

    for meta in ctx.storage.entries().await {
        if meta.last_republished > cutoff {
            continue;
        }

        ctx.storage.mark_republished(&meta).await;

        let Some(entry) = ctx.storage.get_by_metadata(&meta).await else {
            warn!("[{}] entry {} not found", ctx.local.id.short(), meta.key.short());
            continue;
        };

        let closest = ctx.routing.find_closest(&meta.key, ctx.config.k_value).await;
        for node in closest.iter().filter(|n| n.id != ctx.local.id) {
            let message = Message::Store {
                origin: ctx.local,
                entry: entry.clone(),
            };
            ctx.network.send(node.addr, message, None).await;
        }

        if !closest.iter().any(|n| n.id == ctx.local.id) {
            if let Err(e) = ctx.storage.remove(&meta).await {
                warn!("[{}] removing local content {} failed: {}", ctx.local.id.short(), meta.key.short(), e);
            }
        }
        republished += 1;
    }

    if republished > 0 {
        info!("[{}] republished {} entries", ctx.local.id.short(), republished);
    }
}

/// 刷新bucket，然后刷新内容
pub async fn kad_refresh(ctx: &Arc<DhtContext>) {
    bucket_refresh(ctx).await;
    content_refresh(ctx).await;
}
