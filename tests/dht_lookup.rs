use kadnet::dht::{KademliaConfig, KademliaError, KademliaNode, NodeId, NodeInfo};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

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

/// 三个节点排成一条线，C只认识B，也能找到A
#[tokio::test]
async fn test_lookup_through_intermediate_node() {
    let _ = env_logger::builder().is_test(true).try_init();

    let a = spawn_node("a", test_config()).await;
    let b = spawn_node("b", test_config()).await;
    let c = spawn_node("c", test_config()).await;

    b.bootstrap(a.local_node()).await.unwrap();
    c.bootstrap(b.local_node()).await.unwrap();

    let found = c.find_node(&a.local_node().id).await;
    assert!(!found.is_empty());
    assert_eq!(found[0].id, a.local_node().id);
    assert!(c.routing_table().contains(&a.local_node().id).await);

    // 被连接的一方也记住了对方
    assert!(a.routing_table().contains(&b.local_node().id).await);

    for node in [a, b, c] {
        node.shutdown(false).await.unwrap();
    }
}

/// 不回应的节点不会出现在结果里，并且被移出路由表
#[tokio::test]
async fn test_silent_peer_is_dropped() {
    let _ = env_logger::builder().is_test(true).try_init();

    let a = spawn_node("a", test_config()).await;
    let b = spawn_node("b", test_config()).await;
    b.bootstrap(a.local_node()).await.unwrap();

    let silent = UdpSocket::bind(localhost()).await.unwrap();
    let silent_node = NodeInfo::new(NodeId::random(), silent.local_addr().unwrap());
    a.routing_table().insert(silent_node).await;
    assert!(a.routing_table().contains(&silent_node.id).await);

    let found = a.find_node(&silent_node.id).await;

    assert!(found.iter().all(|n| n.id != silent_node.id));
    assert!(found.iter().any(|n| n.id == b.local_node().id));
    assert!(!a.routing_table().contains(&silent_node.id).await);

    a.shutdown(false).await.unwrap();
    b.shutdown(false).await.unwrap();
}

/// 查找结果等于所有节点中离目标最近的k个
#[tokio::test]
async fn test_lookup_converges_to_closest_nodes() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = KademliaConfig {
        k_value: 5,
        ..test_config()
    };

    let first = spawn_node("node0", config.clone()).await;
    let mut nodes = vec![first];
    for i in 1..8 {
        let node = spawn_node(&format!("node{}", i), config.clone()).await;
        node.bootstrap(nodes[0].local_node()).await.unwrap();
        nodes.push(node);
    }

    let target = NodeId::random();
    let mut expected: Vec<NodeId> = nodes.iter().map(|n| n.local_node().id).collect();
    expected.sort_by_key(|id| target.xor(id));
    expected.truncate(5);

    let found: Vec<NodeId> = nodes[7].find_node(&target).await.iter().map(|n| n.id).collect();
    assert_eq!(found, expected);

    for node in nodes {
        node.shutdown(false).await.unwrap();
    }
}

#[tokio::test]
async fn test_lookup_on_lonely_node_returns_itself() {
    let a = spawn_node("alone", test_config()).await;

    let found = a.find_node(&NodeId::random()).await;
    assert_eq!(found, vec![*a.local_node()]);

    a.shutdown(false).await.unwrap();
}

/// 引导节点不回应时重试后报告NoResponse
#[tokio::test]
async fn test_bootstrap_gives_up() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = KademliaConfig {
        response_timeout: Duration::from_millis(100),
        max_connect_attempts: 2,
        ..test_config()
    };
    let a = spawn_node("a", config).await;

    let silent = UdpSocket::bind(localhost()).await.unwrap();
    let peer = NodeInfo::new(NodeId::random(), silent.local_addr().unwrap());

    let result = a.bootstrap(&peer).await;
    assert!(matches!(result, Err(KademliaError::NoResponse)));
    assert!(a.routing_table().is_empty().await);

    // 每次尝试一个数据报
    let mut buf = [0u8; 2048];
    let mut received = 0;
    while let Ok(Ok(_)) = tokio::time::timeout(Duration::from_millis(50), silent.recv_from(&mut buf)).await {
        received += 1;
    }
    assert_eq!(received, 2);

    a.shutdown(false).await.unwrap();
}

/// 关闭节点会让正在等待的查找立即返回
#[tokio::test]
async fn test_shutdown_interrupts_lookup() {
    let config = KademliaConfig {
        response_timeout: Duration::from_secs(5),
        operation_timeout: Duration::from_secs(30),
        ..KademliaConfig::default()
    };
    let a = Arc::new(spawn_node("a", config).await);

    let silent = UdpSocket::bind(localhost()).await.unwrap();
    a.routing_table()
        .insert(NodeInfo::new(NodeId::random(), silent.local_addr().unwrap()))
        .await;

    let lookup = {
        let a = a.clone();
        tokio::spawn(async move { a.find_node(&NodeId::random()).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    a.shutdown(false).await.unwrap();
    assert!(!a.is_running());

    let found = tokio::time::timeout(Duration::from_secs(1), lookup)
        .await
        .expect("lookup still running after shutdown")
        .unwrap();
    assert_eq!(found, vec![*a.local_node()]);
}

/// 超时的节点立即被移出路由表，不用等查找结束
#[tokio::test]
async fn test_timed_out_peer_is_evicted_during_lookup() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = KademliaConfig {
        alpha_value: 1,
        response_timeout: Duration::from_millis(300),
        ..test_config()
    };
    let a = Arc::new(spawn_node("a", config).await);

    let dead = UdpSocket::bind(localhost()).await.unwrap();
    let dead_node = NodeInfo::new(NodeId::random(), dead.local_addr().unwrap());
    let slow = UdpSocket::bind(localhost()).await.unwrap();
    let slow_node = NodeInfo::new(NodeId::random(), slow.local_addr().unwrap());
    a.routing_table().insert(dead_node).await;
    a.routing_table().insert(slow_node).await;

    // 目标就是dead_node，所以它先被询问
    let lookup = {
        let a = a.clone();
        tokio::spawn(async move { a.find_node(&dead_node.id).await })
    };

    // dead_node已超时，slow_node的请求还在等待
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert!(!lookup.is_finished());
    assert!(!a.routing_table().contains(&dead_node.id).await);
    assert!(a.routing_table().contains(&slow_node.id).await);

    let found = lookup.await.unwrap();
    assert_eq!(found, vec![*a.local_node()]);
    assert!(!a.routing_table().contains(&slow_node.id).await);

    a.shutdown(false).await.unwrap();
}
