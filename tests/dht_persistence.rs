use kadnet::dht::{Content, GetParameter, KademliaConfig, KademliaError, KademliaNode, NodeId, DEFAULT_KIND};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::tempdir;

fn test_config() -> KademliaConfig {
    KademliaConfig {
        response_timeout: Duration::from_millis(200),
        operation_timeout: Duration::from_secs(3),
        ..KademliaConfig::default()
    }
}

fn localhost() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// 关闭时保存的状态可以在重启时恢复：ID、路由表、内容
#[tokio::test]
async fn test_state_survives_restart() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempdir().unwrap();
    let config = KademliaConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..test_config()
    };

    let peer = KademliaNode::start("bob", NodeId::random(), localhost(), test_config())
        .await
        .unwrap();

    let id = NodeId::random();
    let node = KademliaNode::start("alice", id, localhost(), config.clone()).await.unwrap();
    node.bootstrap(peer.local_node()).await.unwrap();

    let content = Content::new(NodeId::from_name("diary"), "alice", DEFAULT_KIND, "dear diary");
    let params = GetParameter::new(content.key, "alice", DEFAULT_KIND);
    assert!(node.put_locally(content).await);

    node.shutdown(true).await.unwrap();
    drop(node);

    assert!(dir.path().join("alice").join("nodeState").join("state.json").exists());

    let restored = KademliaNode::load("alice", localhost(), config)
        .await
        .unwrap()
        .expect("saved state should be found");

    assert_eq!(restored.local_node().id, id);
    assert!(restored.routing_table().contains(&peer.local_node().id).await);

    let entry = restored.storage().get(&params).await.expect("content should be restored");
    assert_eq!(entry.content.value, b"dear diary".to_vec());

    restored.shutdown(false).await.unwrap();
    peer.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn test_load_without_saved_state() {
    let dir = tempdir().unwrap();
    let config = KademliaConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..test_config()
    };

    assert!(KademliaNode::load("nobody", localhost(), config).await.unwrap().is_none());
    assert!(KademliaNode::load("nobody", localhost(), test_config())
        .await
        .unwrap()
        .is_none());
}

/// 没有数据目录时保存会失败，但节点仍然被关闭
#[tokio::test]
async fn test_persist_without_data_dir() {
    let node = KademliaNode::start("alice", NodeId::random(), localhost(), test_config())
        .await
        .unwrap();

    let result = node.shutdown(true).await;
    assert!(matches!(result, Err(KademliaError::Persistence(_))));
    assert!(!node.is_running());
}
