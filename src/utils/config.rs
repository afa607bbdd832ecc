use crate::dht::{BootstrapConfig, KademliaConfig, KademliaError, NodeId};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Path error: {0}")]
    PathError(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// 应用程序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 节点所有者名称，也是数据目录下的子目录名
    pub owner: String,

    /// 节点ID（十六进制），为空时由所有者名称派生
    pub node_id: Option<String>,

    /// 监听地址
    pub listen_addr: String,

    /// DHT引导节点，格式: <nodeid_hex>@<ip>:<port>
    pub bootstrap_nodes: Vec<String>,

    /// 日志级别
    pub log_level: String,

    /// 数据目录
    pub data_dir: PathBuf,

    /// 刷新间隔（秒）
    pub refresh_interval_secs: u64,

    /// 每个bucket的容量
    pub k_value: usize,

    /// 查找的并发度
    pub alpha_value: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owner: "kadnet".to_string(),
            node_id: None,
            listen_addr: "0.0.0.0:0".to_string(),
            bootstrap_nodes: vec![],
            log_level: "info".to_string(),
            data_dir: PathBuf::from("data"),
            refresh_interval_secs: 3600, // 1小时
            k_value: 20,
            alpha_value: 3,
        }
    }
}

impl Config {
    /// 从文件加载配置，文件不存在时返回默认配置
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let mut file = File::open(path)?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;

        let config = serde_json::from_str(&content)?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;

        Ok(())
    }

    /// 确保数据目录存在
    pub fn ensure_data_dir(&self) -> Result<(), ConfigError> {
        create_dir_all(&self.data_dir)?;
        Ok(())
    }

    /// 默认配置文件路径
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("kadnet").join("config.json"))
            .ok_or_else(|| ConfigError::PathError("No configuration directory on this platform".to_string()))
    }

    /// 节点ID：配置了就解析，否则由所有者名称派生
    pub fn node_id(&self) -> Result<NodeId, ConfigError> {
        match &self.node_id {
            Some(id) => id.parse().map_err(|e: KademliaError| ConfigError::InvalidValue(e.to_string())),
            None => Ok(NodeId::from_name(&self.owner)),
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("listen address {}", self.listen_addr)))
    }

    pub fn bootstrap(&self) -> Result<BootstrapConfig, ConfigError> {
        let bootstrap =
            BootstrapConfig::from_strings(&self.bootstrap_nodes).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        bootstrap.validate().map_err(ConfigError::InvalidValue)?;
        Ok(bootstrap)
    }

    /// 生成DHT配置
    pub fn kademlia_config(&self) -> KademliaConfig {
        KademliaConfig {
            k_value: self.k_value,
            alpha_value: self.alpha_value,
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            data_dir: Some(self.data_dir.clone()),
            ..KademliaConfig::default()
        }
    }
}
