use crate::dht::operations::DhtContext;
use crate::dht::protocol::{Message, MessageRoute};
use log::{debug, info, trace};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 启动消息处理任务，处理所有未被待处理请求认领的入站消息
pub(crate) fn spawn_message_handler(ctx: Arc<DhtContext>, mut inbound: mpsc::Receiver<MessageRoute>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let route = tokio::select! {
                route = inbound.recv() => route,
                _ = ctx.network.closed() => None,
            };

            match route {
                Some(route) => handle_message(&ctx, route).await,
                None => break,
            }
        }

        debug!("[{}] message handler stopped", ctx.local.id.short());
    })
}

async fn handle_message(ctx: &DhtContext, route: MessageRoute) {
    let sender = route.sender();
    trace!("[{}] {} from {}", ctx.local.id.short(), route.message.name(), sender);

    match route.message {
        Message::Connect { .. } => {
            ctx.routing.insert(sender).await;

            let ack = Message::Acknowledge { origin: ctx.local };
            ctx.network.reply(route.from, ack, route.conversation_id).await;
        }

        Message::FindNode { target, .. } => {
            ctx.routing.insert(sender).await;

            let nodes = ctx.routing.find_closest(&target, ctx.config.k_value).await;
            let reply = Message::FindNodeReply {
                origin: ctx.local,
                nodes,
            };
            ctx.network.reply(route.from, reply, route.conversation_id).await;
        }

        Message::FindValue { params, .. } => {
            ctx.routing.insert(sender).await;

            let reply = match ctx.storage.get(&params).await {
                Some(entry) => Message::Content {
                    origin: ctx.local,
                    entry,
                },
                None => Message::FindNodeReply {
                    origin: ctx.local,
                    nodes: ctx.routing.find_closest(&params.key, ctx.config.k_value).await,
                },
            };
            ctx.network.reply(route.from, reply, route.conversation_id).await;
        }

        Message::Store { entry, .. } => {
            ctx.routing.insert(sender).await;
            ctx.storage.store(&entry).await;
        }

        Message::Simple { text, .. } => {
            info!("[{}] message from {}: {}", ctx.local.id.short(), sender, text);
        }

        Message::Acknowledge { .. } | Message::FindNodeReply { .. } | Message::Content { .. } => {
            debug!(
                "[{}] dropping late or unsolicited {} from {}",
                ctx.local.id.short(),
                route.message.name(),
                sender
            );
        }
    }
}
