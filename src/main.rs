use kadnet::cli::CommandProcessor;
use kadnet::dht::{validate_node_id, KademliaNode};
use kadnet::utils::{parse_log_level, setup_logger, Config};

use anyhow::{anyhow, Context};
use clap::{ArgAction, Parser};
use colored::*;
use log::{error, info, warn};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::ctrl_c;

/// 命令行参数
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// 节点所有者名称
    #[clap(short, long)]
    name: Option<String>,

    /// 节点ID（40位十六进制），默认由名称派生
    #[clap(long)]
    id: Option<String>,

    /// 监听端口
    #[clap(short, long)]
    port: Option<u16>,

    /// DHT 引导节点列表，格式: <nodeid_hex>@<ip>:<port>
    #[clap(short, long, action = ArgAction::Append)]
    bootstrap: Vec<String>,

    /// 日志级别
    #[clap(long)]
    log_level: Option<String>,

    /// 启用详细日志
    #[clap(short, long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// 数据目录
    #[clap(long)]
    data_dir: Option<PathBuf>,

    /// 退出时不保存节点状态
    #[clap(long, action = ArgAction::SetTrue)]
    no_save: bool,

    /// 不启动交互式控制台，等待Ctrl+C
    #[clap(long, action = ArgAction::SetTrue)]
    daemon: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 加载配置文件
    let config_path = Config::default_path().unwrap_or_else(|_| PathBuf::from("kadnet.json"));
    let mut config = Config::load(&config_path)?;
    if !config_path.exists() {
        config.save(&config_path)?;
    }

    // 命令行参数覆盖配置
    if let Some(name) = args.name {
        config.owner = name;
    }
    if let Some(id) = args.id {
        validate_node_id(&id).map_err(|e| anyhow!(e))?;
        config.node_id = Some(id);
    }
    if let Some(port) = args.port {
        config.listen_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port).to_string();
    }
    if !args.bootstrap.is_empty() {
        config.bootstrap_nodes = args.bootstrap;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    config.ensure_data_dir()?;

    // 初始化日志
    let level = if args.verbose { "debug" } else { config.log_level.as_str() };
    setup_logger(Some(parse_log_level(level).map_err(|e| anyhow!(e))?)).map_err(|e| anyhow!(e))?;

    info!("{}", format!("Starting kadnet node {}...", config.owner).green().bold());

    let listen_addr = config.listen_addr()?;
    let bootstrap = config.bootstrap()?;
    let kad_config = config.kademlia_config();

    // 有保存的状态就恢复
    let node = match KademliaNode::load(&config.owner, listen_addr, kad_config.clone()).await? {
        Some(node) => {
            info!("Restored saved state of {}", config.owner);
            node
        }
        None => KademliaNode::start(&config.owner, config.node_id()?, listen_addr, kad_config)
            .await
            .context("Failed to start node")?,
    };
    let node = Arc::new(node);

    info!(
        "Node {} listening on {}",
        node.local_node().id.to_string().cyan(),
        node.local_node().addr
    );

    // 引导 DHT
    for peer in &bootstrap.nodes {
        match node.bootstrap(peer).await {
            Ok(()) => info!("Bootstrapped from {}", peer),
            Err(e) => warn!("Bootstrap from {} failed: {}", peer, e),
        }
    }

    if args.daemon {
        ctrl_c().await?;
    } else {
        let console = CommandProcessor::new(node.clone());
        tokio::select! {
            result = console.run() => {
                if let Err(e) = result {
                    error!("Command processor error: {}", e);
                }
            }
            result = ctrl_c() => {
                if let Err(e) = result {
                    error!("Error waiting for Ctrl+C: {}", e);
                }
            }
        }
    }

    info!("Shutting down...");
    node.shutdown(!args.no_save).await?;

    info!("kadnet node stopped.");
    Ok(())
}
