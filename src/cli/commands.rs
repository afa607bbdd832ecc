use crate::dht::{validate_node_id, Content, GetParameter, KademliaNode, NodeId, DEFAULT_KIND};
use crate::utils::{format_bytes, format_timestamp};
use colored::*;
use indoc::indoc;

/// 命令结果
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Success(String),
    Info(String),
    Warning(String),
    Error(String),
    Exit,
}

/// 控制台命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Exit,
    /// 存储内容：键、值、类型
    Put { key: NodeId, value: String, kind: String },
    /// 查找内容：键、所有者、类型
    Get { key: NodeId, owner: Option<String>, kind: String },
    /// 查找节点
    Find { target: NodeId },
    WhoAmI,
    Status,
    DhtRoutes,
    Refresh,
}

impl Command {
    /// 解析一行输入，开头的 `/` 可有可无，参数可以带引号
    pub fn parse(line: &str) -> Result<Command, String> {
        let line = line.trim();
        let line = line.strip_prefix('/').unwrap_or(line);

        let words = shlex::split(line).ok_or_else(|| format!("Unbalanced quotes in: {}", line))?;
        let Some((name, args)) = words.split_first() else {
            return Err("Empty command".to_string());
        };

        match name.as_str() {
            "help" => Ok(Command::Help),
            "exit" | "quit" => Ok(Command::Exit),
            "put" => match args {
                [key, value] => Ok(Command::Put {
                    key: parse_key(key),
                    value: value.clone(),
                    kind: DEFAULT_KIND.to_string(),
                }),
                [key, value, kind] => Ok(Command::Put {
                    key: parse_key(key),
                    value: value.clone(),
                    kind: kind.clone(),
                }),
                _ => Err("Usage: /put <key> <value> [kind]".to_string()),
            },
            "get" => match args {
                [key] => Ok(Command::Get {
                    key: parse_key(key),
                    owner: None,
                    kind: DEFAULT_KIND.to_string(),
                }),
                [key, owner] => Ok(Command::Get {
                    key: parse_key(key),
                    owner: Some(owner.clone()),
                    kind: DEFAULT_KIND.to_string(),
                }),
                [key, owner, kind] => Ok(Command::Get {
                    key: parse_key(key),
                    owner: Some(owner.clone()),
                    kind: kind.clone(),
                }),
                _ => Err("Usage: /get <key> [owner] [kind]".to_string()),
            },
            "find" => match args {
                [id] => validate_node_id(id).map(|target| Command::Find { target }),
                _ => Err("Usage: /find <node_id>".to_string()),
            },
            "whoami" => Ok(Command::WhoAmI),
            "status" => Ok(Command::Status),
            "dht-routes" | "routes" => Ok(Command::DhtRoutes),
            "refresh" => Ok(Command::Refresh),
            other => Err(format!("Unknown command: {}", other)),
        }
    }

    /// 执行命令
    pub async fn execute(&self, node: &KademliaNode) -> CommandResult {
        match self {
            Command::Help => Self::help(),
            Command::Exit => CommandResult::Exit,
            Command::Put { key, value, kind } => Self::put(node, *key, value, kind).await,
            Command::Get { key, owner, kind } => Self::get(node, *key, owner.as_deref(), kind).await,
            Command::Find { target } => Self::find(node, target).await,
            Command::WhoAmI => Self::whoami(node),
            Command::Status => Self::status(node).await,
            Command::DhtRoutes => CommandResult::Info(node.routing_table().describe().await),
            Command::Refresh => {
                node.refresh().await;
                CommandResult::Success("Refresh finished".to_string())
            }
        }
    }

    /// 帮助命令
    fn help() -> CommandResult {
        let help_text = indoc! {"
            Available commands:

            /help                        - Show this help message
            /exit, /quit                 - Exit the application
            /put <key> <value> [kind]    - Store a value on the K closest nodes
            /get <key> [owner] [kind]    - Look a value up
            /find <node_id>              - Find the nodes closest to an id
            /whoami                      - Show this node's identity
            /status                      - Show node statistics
            /dht-routes                  - Show the routing table
            /refresh                     - Refresh buckets and republish content

            Keys are 40 hex characters or any name, which is hashed into an id.
        "};

        CommandResult::Info(help_text.to_string())
    }

    async fn put(node: &KademliaNode, key: NodeId, value: &str, kind: &str) -> CommandResult {
        let content = Content::new(key, node.owner(), kind, value.as_bytes().to_vec());
        let stored = node.put(content).await;

        if stored == 0 {
            CommandResult::Warning(format!("Value {} was not stored anywhere", key.short()))
        } else {
            CommandResult::Success(format!("Stored {} on {} nodes", key.short(), stored))
        }
    }

    async fn get(node: &KademliaNode, key: NodeId, owner: Option<&str>, kind: &str) -> CommandResult {
        let params = GetParameter::new(key, owner.unwrap_or(node.owner()), kind);

        match node.get(&params).await {
            Some(entry) => CommandResult::Info(format!(
                "{} {}\n  owner: {}\n  updated: {}",
                key.short().cyan(),
                String::from_utf8_lossy(&entry.content.value),
                entry.content.owner,
                format_timestamp(entry.content.last_updated)
            )),
            None => CommandResult::Warning(format!("No value found for {}", key.short())),
        }
    }

    async fn find(node: &KademliaNode, target: &NodeId) -> CommandResult {
        let nodes = node.find_node(target).await;
        if nodes.is_empty() {
            return CommandResult::Warning("No nodes found".to_string());
        }

        let mut result = format!("Closest nodes to {}:\n", target.short());
        for (i, n) in nodes.iter().enumerate() {
            result.push_str(&format!("{:>3}. {} {}\n", i + 1, n.id.to_string().cyan(), n.addr));
        }

        CommandResult::Info(result)
    }

    fn whoami(node: &KademliaNode) -> CommandResult {
        let local = node.local_node();

        CommandResult::Info(format!(
            "Owner: {}\nNode ID: {}\nAddress: {}\nBootstrap string: {}@{}",
            node.owner().green(),
            local.id,
            local.addr,
            local.id,
            local.addr
        ))
    }

    async fn status(node: &KademliaNode) -> CommandResult {
        let stats = node.stats();

        CommandResult::Info(format!(
            "Contacts: {}\nStored values: {}\nTraffic: {} sent, {} received\n{}",
            node.routing_table().len().await,
            node.storage().len().await,
            format_bytes(stats.bytes_sent),
            format_bytes(stats.bytes_received),
            stats
        ))
    }
}

/// 40位十六进制按ID解析，其他字符串哈希为ID
fn parse_key(key: &str) -> NodeId {
    validate_node_id(key).unwrap_or_else(|_| NodeId::from_name(key))
}
