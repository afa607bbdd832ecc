use crate::dht::network::Outcome;
use crate::dht::operations::{bucket_refresh, find_node, DhtContext};
use crate::dht::protocol::Message;
use crate::dht::{KademliaError, NodeInfo};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// 通过引导节点加入网络
///
/// 发送Connect，超时后重发，最多 `max_connect_attempts` 次。收到Acknowledge后把引导节点
/// 加入路由表，查找本地ID，然后刷新所有bucket。
pub async fn connect(ctx: &Arc<DhtContext>, bootstrap: &NodeInfo) -> Result<(), KademliaError> {
    let started = Instant::now();
    let (tx, mut rx) = mpsc::unbounded_channel();

    for attempt in 1..=ctx.config.max_connect_attempts {
        let message = Message::Connect { origin: ctx.local };
        let Some(conversation_id) = ctx.network.send(bootstrap.addr, message, Some(tx.clone())).await else {
            if !ctx.network.is_running() {
                return Err(KademliaError::NetworkDown);
            }
            continue;
        };

        debug!("[{}] connect attempt {} to {}", ctx.local.id.short(), attempt, bootstrap.addr);

        loop {
            let response = tokio::select! {
                response = rx.recv() => response.ok_or(KademliaError::NetworkDown)?,
                _ = ctx.network.closed() => return Err(KademliaError::NetworkDown),
            };

            if response.conversation_id != conversation_id {
                continue;
            }

            match response.outcome {
                Outcome::Reply(Message::Acknowledge { origin }) => {
                    let peer = NodeInfo::new(origin.id, response.peer);
                    ctx.routing.insert(peer).await;
                    info!("[{}] connected to {}", ctx.local.id.short(), peer);

                    find_node(ctx, &ctx.local.id).await;
                    bucket_refresh(ctx).await;

                    ctx.stats.record_bootstrap(started.elapsed());
                    return Ok(());
                }
                Outcome::Reply(other) => {
                    warn!("[{}] unexpected {} from {}", ctx.local.id.short(), other.name(), bootstrap.addr);
                    break;
                }
                Outcome::Timeout => break,
            }
        }
    }

    warn!(
        "[{}] bootstrap node {} did not answer after {} attempts",
        ctx.local.id.short(),
        bootstrap.addr,
        ctx.config.max_connect_attempts
    );
    Err(KademliaError::NoResponse)
}
