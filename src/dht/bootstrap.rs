use crate::dht::{validate_node_id, KademliaError, NodeInfo};
use std::net::{SocketAddr, ToSocketAddrs};

/// 引导节点配置
#[derive(Debug, Clone, Default)]
pub struct BootstrapConfig {
    /// 引导节点列表
    pub nodes: Vec<NodeInfo>,
}

impl BootstrapConfig {
    /// 从 `<id>@<host:port>` 字符串列表创建
    pub fn from_strings<S: AsRef<str>>(entries: &[S]) -> Result<Self, KademliaError> {
        let nodes = entries
            .iter()
            .map(|e| parse_bootstrap_node(e.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { nodes })
    }

    /// 验证引导节点配置，空列表表示作为第一个节点启动
    pub fn validate(&self) -> Result<(), String> {
        for (i, node) in self.nodes.iter().enumerate() {
            if node.addr.port() == 0 {
                return Err(format!("Bootstrap node {} has no port", i));
            }
        }

        Ok(())
    }
}

/// 解析引导节点
///
/// 格式为 `<40位十六进制ID>@<地址>`，地址可以是 `ip:port` 或者 `host:port`。
pub fn parse_bootstrap_node(entry: &str) -> Result<NodeInfo, KademliaError> {
    let (id_str, addr_str) = entry
        .trim()
        .split_once('@')
        .ok_or_else(|| KademliaError::OperationFailed(format!("Invalid bootstrap node: {}", entry)))?;

    let id = validate_node_id(id_str).map_err(KademliaError::InvalidNodeId)?;
    let addr = resolve_addr(addr_str)?;

    Ok(NodeInfo::new(id, addr))
}

fn resolve_addr(addr_str: &str) -> Result<SocketAddr, KademliaError> {
    if let Ok(addr) = addr_str.parse::<SocketAddr>() {
        return Ok(addr);
    }

    addr_str
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| KademliaError::OperationFailed(format!("Cannot resolve address: {}", addr_str)))
}
