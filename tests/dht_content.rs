use kadnet::dht::{Content, GetParameter, KademliaConfig, KademliaNode, NodeId, DEFAULT_KIND};
use std::net::SocketAddr;
use std::time::Duration;

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

async fn spawn_node(name: &str, config: KademliaConfig) -> KademliaNode {
    KademliaNode::start(name, NodeId::random(), localhost(), config)
        .await
        .expect("Failed to start node")
}

/// 等待内容出现在节点的本地存储中
async fn wait_for_content(node: &KademliaNode, params: &GetParameter) -> bool {
    for _ in 0..40 {
        if node.storage().contains(params).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// put会把内容存到对方节点上
#[tokio::test]
async fn test_put_replicates_to_peer() {
    let _ = env_logger::builder().is_test(true).try_init();

    let a = spawn_node("alice", test_config()).await;
    let b = spawn_node("bob", test_config()).await;
    b.bootstrap(a.local_node()).await.unwrap();

    let content = Content::new(NodeId::from_name("greeting"), "alice", DEFAULT_KIND, "hello");
    let params = GetParameter::new(content.key, "alice", DEFAULT_KIND);

    let stored = a.put(content).await;
    assert_eq!(stored, 2);

    assert!(a.storage().contains(&params).await);
    assert!(wait_for_content(&b, &params).await);

    let entry = b.get(&params).await.expect("value should be found");
    assert_eq!(entry.content.value, b"hello".to_vec());

    a.shutdown(false).await.unwrap();
    b.shutdown(false).await.unwrap();
}

/// 只存在A本地的内容，B可以通过网络查到，且不会缓存
#[tokio::test]
async fn test_remote_get() {
    let _ = env_logger::builder().is_test(true).try_init();

    let a = spawn_node("alice", test_config()).await;
    let b = spawn_node("bob", test_config()).await;
    b.bootstrap(a.local_node()).await.unwrap();

    let content = Content::new(NodeId::random(), "alice", "note", "remote value");
    let params = GetParameter::new(content.key, "alice", "note");
    assert!(a.put_locally(content).await);

    let entry = b.get(&params).await.expect("value should be found remotely");
    assert_eq!(entry.content.value, b"remote value".to_vec());
    assert_eq!(entry.content.owner, "alice");
    assert!(!b.storage().contains(&params).await);

    let stats = b.stats();
    assert_eq!(stats.content_lookups, 1);
    assert_eq!(stats.failed_lookups, 0);
    assert!(stats.route_length >= 1);

    // 类型不同就查不到
    let wrong_kind = GetParameter::new(params.key, "alice", DEFAULT_KIND);
    assert!(b.get(&wrong_kind).await.is_none());
    assert_eq!(b.stats().failed_lookups, 1);

    a.shutdown(false).await.unwrap();
    b.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn test_get_missing_value() {
    let a = spawn_node("alice", test_config()).await;
    let b = spawn_node("bob", test_config()).await;
    b.bootstrap(a.local_node()).await.unwrap();

    let params = GetParameter::new(NodeId::random(), "nobody", DEFAULT_KIND);
    assert!(a.get(&params).await.is_none());

    a.shutdown(false).await.unwrap();
    b.shutdown(false).await.unwrap();
}

/// 旧的写入不会覆盖新的内容
#[tokio::test]
async fn test_stale_write_is_ignored() {
    let a = spawn_node("alice", test_config()).await;

    let key = NodeId::from_name("versioned");
    let params = GetParameter::new(key, "alice", DEFAULT_KIND);

    let current = Content::new(key, "alice", DEFAULT_KIND, "v1");
    assert!(a.put_locally(current.clone()).await);

    let mut older = current.clone();
    older.value = b"v0".to_vec();
    older.last_updated -= 10;
    assert!(!a.put_locally(older).await);
    assert_eq!(a.get(&params).await.unwrap().content.value, b"v1".to_vec());

    let mut newer = current.clone();
    newer.value = b"v2".to_vec();
    newer.last_updated += 10;
    assert!(a.put_locally(newer).await);
    assert_eq!(a.get(&params).await.unwrap().content.value, b"v2".to_vec());
    assert_eq!(a.storage().len().await, 1);

    a.shutdown(false).await.unwrap();
}

/// 刷新时内容被推到离键最近的节点，本地不在最近的节点中就删除
#[tokio::test]
async fn test_content_refresh_moves_content() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = KademliaConfig {
        k_value: 1,
        republish_interval: Duration::ZERO,
        ..test_config()
    };
    let a = spawn_node("alice", config.clone()).await;
    let b = spawn_node("bob", config).await;
    b.bootstrap(a.local_node()).await.unwrap();

    let for_b = Content::new(b.local_node().id, "alice", DEFAULT_KIND, "belongs to bob");
    let for_a = Content::new(a.local_node().id, "alice", DEFAULT_KIND, "belongs to alice");
    let params_b = GetParameter::new(for_b.key, "alice", DEFAULT_KIND);
    let params_a = GetParameter::new(for_a.key, "alice", DEFAULT_KIND);
    assert!(a.put_locally(for_b).await);
    assert!(a.put_locally(for_a).await);

    a.refresh().await;

    assert!(wait_for_content(&b, &params_b).await);
    assert!(!a.storage().contains(&params_b).await);
    assert!(a.storage().contains(&params_a).await);
    assert!(!b.storage().contains(&params_a).await);

    a.shutdown(false).await.unwrap();
    b.shutdown(false).await.unwrap();
}

/// 最近发布过的内容在刷新时既不转发也不删除
#[tokio::test]
async fn test_content_refresh_skips_recent_entries() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = KademliaConfig {
        k_value: 1,
        republish_interval: Duration::from_secs(3600),
        ..test_config()
    };
    let a = spawn_node("alice", config.clone()).await;
    let b = spawn_node("bob", config).await;
    b.bootstrap(a.local_node()).await.unwrap();

    let for_b = Content::new(b.local_node().id, "alice", DEFAULT_KIND, "not due yet");
    let params = GetParameter::new(for_b.key, "alice", DEFAULT_KIND);
    assert!(a.put_locally(for_b).await);

    a.refresh().await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(a.storage().contains(&params).await);
    assert!(!b.storage().contains(&params).await);

    a.shutdown(false).await.unwrap();
    b.shutdown(false).await.unwrap();
}
