use crate::dht::node_id::ID_BYTES;
use crate::dht::NodeId;

/// 验证节点ID的格式和有效性
///
/// # 参数
/// * `node_id_str` - 要验证的节点ID字符串
///
/// # 返回值
/// * `Ok(NodeId)` - 如果验证成功，返回解析后的NodeId
/// * `Err(String)` - 如果验证失败，返回错误信息
///
/// # 验证步骤
/// - 检查长度是否为40个字符（20字节的十六进制表示）
/// - 确保所有字符都是有效的十六进制字符
/// - 尝试解析为NodeId类型
pub fn validate_node_id(node_id_str: &str) -> Result<NodeId, String> {
    if node_id_str.len() != ID_BYTES * 2 || !node_id_str.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("Invalid node ID format: {}", node_id_str));
    }

    node_id_str.parse::<NodeId>().map_err(|e| e.to_string())
}
