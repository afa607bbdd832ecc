use crate::dht::operations::{DhtContext, Lookup};
use crate::dht::protocol::Message;
use crate::dht::{GetParameter, StorageEntry};
use log::debug;

/// Outcome of a value lookup
#[derive(Debug, Clone)]
pub struct FindValueResult {
    pub entry: Option<StorageEntry>,
    /// Longest chain of referrals followed during the lookup
    pub route_length: usize,
}

/// Iterative lookup that stops at the first matching `Content` reply
pub async fn find_value(ctx: &DhtContext, params: &GetParameter) -> FindValueResult {
    let request = Message::FindValue {
        origin: ctx.local,
        params: params.clone(),
    };
    let mut lookup = Lookup::new(ctx, params.key, request).await;
    let mut found = None;

    while let Some((node, reply)) = lookup.next_reply().await {
        match reply {
            Message::FindNodeReply { nodes, .. } => lookup.accept(&node, nodes).await,
            Message::Content { entry, .. } if entry.metadata.satisfies(params) => {
                debug!("[{}] content {} found at {}", ctx.local.id.short(), params.key.short(), node);
                lookup.accept(&node, Vec::new()).await;
                found = Some(entry);
                break;
            }
            other => lookup.reject(&node, &other).await,
        }
    }

    let route_length = lookup.route_length();
    lookup.finish().await;

    FindValueResult {
        entry: found,
        route_length,
    }
}
