use crate::dht::{GetParameter, KademliaError, NodeId, NodeInfo, StorageEntry};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// DHT网络协议消息定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Connect消息 - 加入网络时发给引导节点
    Connect { origin: NodeInfo },

    /// Acknowledge消息 - Connect的响应
    Acknowledge { origin: NodeInfo },

    /// FindNode请求 - 查找离目标最近的k个节点
    FindNode { origin: NodeInfo, target: NodeId },

    /// FindNode响应 - 返回找到的节点列表
    FindNodeReply { origin: NodeInfo, nodes: Vec<NodeInfo> },

    /// FindValue请求 - 查找满足条件的内容
    FindValue { origin: NodeInfo, params: GetParameter },

    /// Content响应 - 返回找到的内容
    Content { origin: NodeInfo, entry: StorageEntry },

    /// Store请求 - 存储内容，不需要响应
    Store { origin: NodeInfo, entry: StorageEntry },

    /// 简单文本消息，用于测试
    Simple { origin: NodeInfo, text: String },
}

impl Message {
    /// 获取消息的发送者信息
    pub fn origin(&self) -> &NodeInfo {
        match self {
            Message::Connect { origin }
            | Message::Acknowledge { origin }
            | Message::FindNode { origin, .. }
            | Message::FindNodeReply { origin, .. }
            | Message::FindValue { origin, .. }
            | Message::Content { origin, .. }
            | Message::Store { origin, .. }
            | Message::Simple { origin, .. } => origin,
        }
    }

    /// 消息类型名，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            Message::Connect { .. } => "Connect",
            Message::Acknowledge { .. } => "Acknowledge",
            Message::FindNode { .. } => "FindNode",
            Message::FindNodeReply { .. } => "FindNodeReply",
            Message::FindValue { .. } => "FindValue",
            Message::Content { .. } => "Content",
            Message::Store { .. } => "Store",
            Message::Simple { .. } => "Simple",
        }
    }
}

/// 一个数据报：会话ID加上消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub conversation_id: u32,
    pub message: Message,
}

impl Packet {
    pub fn new(conversation_id: u32, message: Message) -> Self {
        Self {
            conversation_id,
            message,
        }
    }

    /// 序列化为字节
    pub fn encode(&self) -> Result<Vec<u8>, KademliaError> {
        bincode::serialize(self).map_err(|e| KademliaError::Codec(e.to_string()))
    }

    /// 从字节反序列化
    pub fn decode(bytes: &[u8]) -> Result<Self, KademliaError> {
        bincode::deserialize(bytes).map_err(|e| KademliaError::Codec(e.to_string()))
    }
}

/// 未被任何待处理请求认领的入站消息
#[derive(Debug, Clone)]
pub struct MessageRoute {
    /// 发送者地址
    pub from: SocketAddr,
    /// 会话ID，回复时原样带回
    pub conversation_id: u32,
    /// 消息内容
    pub message: Message,
}

impl MessageRoute {
    pub fn new(from: SocketAddr, conversation_id: u32, message: Message) -> Self {
        Self {
            from,
            conversation_id,
            message,
        }
    }

    /// 发送者的节点信息，地址取数据报的来源地址
    pub fn sender(&self) -> NodeInfo {
        NodeInfo::new(self.message.origin().id, self.from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::Content;

    fn test_node() -> NodeInfo {
        NodeInfo::new(NodeId::random(), "127.0.0.1:8000".parse().unwrap())
    }

    #[test]
    fn test_packet_serialization() {
        let origin = test_node();
        let target = NodeId::random();

        let packet = Packet::new(12345, Message::FindNode { origin, target });
        let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();

        assert_eq!(decoded.conversation_id, 12345);
        match decoded.message {
            Message::FindNode { origin: o, target: t } => {
                assert_eq!(o, origin);
                assert_eq!(o.addr, origin.addr);
                assert_eq!(t, target);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_store_carries_entry() {
        let entry = StorageEntry::new(Content::with_random_key("alice", b"value".to_vec()));
        let packet = Packet::new(7, Message::Store { origin: test_node(), entry: entry.clone() });

        match Packet::decode(&packet.encode().unwrap()).unwrap().message {
            Message::Store { entry: e, .. } => {
                assert_eq!(e.content, entry.content);
                assert_eq!(e.metadata.content_hash, entry.metadata.content_hash);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(Packet::decode(&[0xff, 0x01]), Err(KademliaError::Codec(_))));
    }

    #[test]
    fn test_route_sender_uses_datagram_address() {
        let origin = test_node();
        let from: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let route = MessageRoute::new(from, 1, Message::Connect { origin });

        let sender = route.sender();
        assert_eq!(sender.id, origin.id);
        assert_eq!(sender.addr, from);
        assert_eq!(route.message.name(), "Connect");
    }
}
