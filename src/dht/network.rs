use crate::dht::protocol::{Message, MessageRoute, Packet};
use crate::dht::stats::TransportStats;
use crate::dht::{KademliaConfig, KademliaError};
use log::{debug, error, info, trace, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// 接收缓冲区大小，UDP数据报的上限
const RECV_BUFFER_SIZE: usize = 65536;

/// 一次请求的结局：收到回复或者超时，二者只会发生一个
#[derive(Debug)]
pub enum Outcome {
    Reply(Message),
    Timeout,
}

/// 交给请求方的响应
#[derive(Debug)]
pub struct Response {
    /// 会话ID
    pub conversation_id: u32,
    /// 请求发往的地址
    pub peer: SocketAddr,
    pub outcome: Outcome,
}

/// 请求方接收响应的通道
pub type Responder = mpsc::UnboundedSender<Response>;

/// 待处理的请求
struct PendingRequest {
    responder: Responder,
    timer: JoinHandle<()>,
}

type PendingMap = Arc<Mutex<HashMap<u32, PendingRequest>>>;

/// DHT网络传输层
///
/// 从待处理表中移除记录的一方（收到回复或者超时定时器）负责通知请求方，
/// 所以每个会话只会得到一个结局。
#[derive(Clone)]
pub struct DhtNetwork {
    /// UDP socket用于消息传输
    socket: Arc<UdpSocket>,

    /// 本地绑定地址
    local_addr: SocketAddr,

    /// 待处理的请求
    pending_requests: PendingMap,

    /// 入站消息通道
    inbound_tx: mpsc::Sender<MessageRoute>,

    /// 运行状态
    running: Arc<watch::Sender<bool>>,

    /// 响应超时
    response_timeout: Duration,

    /// 数据报大小上限
    max_datagram_size: usize,

    /// 统计计数
    stats: Arc<TransportStats>,
}

impl DhtNetwork {
    /// 创建新的DHT网络实例
    pub async fn bind(
        bind_addr: SocketAddr,
        config: &KademliaConfig,
    ) -> Result<(Self, mpsc::Receiver<MessageRoute>), KademliaError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let local_addr = socket.local_addr()?;

        info!("DHT network bound to {}", local_addr);

        // 创建消息通道，满了就丢弃，接收循环不等待处理任务
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_size.max(1));
        let (running, _) = watch::channel(false);

        let network = Self {
            socket: Arc::new(socket),
            local_addr,
            pending_requests: Arc::new(Mutex::new(HashMap::new())),
            inbound_tx,
            running: Arc::new(running),
            response_timeout: config.response_timeout,
            max_datagram_size: config.max_datagram_size,
            stats: Arc::new(TransportStats::default()),
        };

        Ok((network, inbound_rx))
    }

    /// 启动网络监听
    pub fn start(&self) {
        self.running.send_replace(true);
        self.spawn_receive_task();

        info!("DHT network started on {}", self.local_addr);
    }

    /// 停止网络：取消所有定时器并丢弃所有请求方，之后的发送都会失败
    pub async fn shutdown(&self) {
        if !self.close() {
            return;
        }

        let mut pending = self.pending_requests.lock().await;
        for (_, request) in pending.drain() {
            request.timer.abort();
        }

        info!("DHT network on {} stopped", self.local_addr);
    }

    /// 标记为停止，返回之前是否在运行；待处理的请求留给 `shutdown` 清理
    pub fn close(&self) -> bool {
        self.running.send_replace(false)
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// 网络停止时完成
    pub async fn closed(&self) {
        let mut rx = self.running.subscribe();
        loop {
            if !*rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// 发送消息
    ///
    /// 给出 `responder` 时登记待处理请求并启动超时定时器，之后回复或超时会通过它送达。
    /// 返回会话ID；网络未运行、消息过大或者发送失败时返回None。
    pub async fn send(&self, peer: SocketAddr, message: Message, responder: Option<Responder>) -> Option<u32> {
        if !self.is_running() {
            warn!("Transport on {} is not running, dropping {}", self.local_addr, message.name());
            return None;
        }

        let find_node = matches!(message, Message::FindNode { .. });

        match responder {
            Some(responder) => {
                let mut pending = self.pending_requests.lock().await;
                let conversation_id = loop {
                    let id = rand::random::<u32>();
                    if id != 0 && !pending.contains_key(&id) {
                        break id;
                    }
                };

                let bytes = self.encode(conversation_id, message)?;
                let timer = self.spawn_timeout(conversation_id, peer);
                pending.insert(conversation_id, PendingRequest { responder, timer });
                drop(pending);

                if self.transmit(peer, &bytes, find_node).await {
                    Some(conversation_id)
                } else {
                    if let Some(request) = self.pending_requests.lock().await.remove(&conversation_id) {
                        request.timer.abort();
                    }
                    None
                }
            }
            None => {
                let conversation_id = rand::random::<u32>().max(1);
                let bytes = self.encode(conversation_id, message)?;
                self.transmit(peer, &bytes, find_node).await.then_some(conversation_id)
            }
        }
    }

    /// 回复消息，不登记待处理请求
    pub async fn reply(&self, peer: SocketAddr, message: Message, conversation_id: u32) -> bool {
        if !self.is_running() {
            return false;
        }

        match self.encode(conversation_id, message) {
            Some(bytes) => self.transmit(peer, &bytes, false).await,
            None => false,
        }
    }

    /// 获取本地地址
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    fn encode(&self, conversation_id: u32, message: Message) -> Option<Vec<u8>> {
        let name = message.name();
        let bytes = match Packet::new(conversation_id, message).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to serialize {}: {}", name, e);
                return None;
            }
        };

        if bytes.len() > self.max_datagram_size {
            warn!("{} is {} bytes, over the datagram limit of {}", name, bytes.len(), self.max_datagram_size);
            return None;
        }

        Some(bytes)
    }

    async fn transmit(&self, peer: SocketAddr, bytes: &[u8], find_node: bool) -> bool {
        match self.socket.send_to(bytes, peer).await {
            Ok(len) => {
                self.stats.record_sent(len, find_node);
                trace!("Sent {} bytes to {}", len, peer);
                true
            }
            Err(e) => {
                warn!("Failed to send message to {}: {}", peer, e);
                false
            }
        }
    }

    /// 超时定时器：到期时若请求仍在待处理表中，移除并通知超时
    fn spawn_timeout(&self, conversation_id: u32, peer: SocketAddr) -> JoinHandle<()> {
        let pending_requests = self.pending_requests.clone();
        let timeout = self.response_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            let request = pending_requests.lock().await.remove(&conversation_id);
            if let Some(request) = request {
                debug!("Request {} to {} timed out", conversation_id, peer);
                let _ = request.responder.send(Response {
                    conversation_id,
                    peer,
                    outcome: Outcome::Timeout,
                });
            }
        })
    }

    /// 启动接收任务
    fn spawn_receive_task(&self) {
        let network = self.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

            loop {
                let received = tokio::select! {
                    received = network.socket.recv_from(&mut buffer) => received,
                    _ = network.closed() => break,
                };

                match received {
                    Ok((len, addr)) => network.dispatch(&buffer[..len], addr).await,
                    Err(e) => {
                        if network.is_running() {
                            error!("Failed to receive message: {}", e);
                        }
                    }
                }
            }

            debug!("DHT network receive task on {} stopped", network.local_addr);
        });
    }

    /// 处理一个入站数据报
    async fn dispatch(&self, data: &[u8], addr: SocketAddr) {
        if data.len() > self.max_datagram_size {
            warn!("Dropping {} byte datagram from {}", data.len(), addr);
            return;
        }

        let packet = match Packet::decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Failed to parse message from {}: {}", addr, e);
                return;
            }
        };

        let is_reply = matches!(packet.message, Message::FindNodeReply { .. });
        self.stats.record_received(data.len(), is_reply);
        trace!("Received {} ({}) from {}", packet.message.name(), packet.conversation_id, addr);

        // 检查是否是对待处理请求的响应
        let pending = self.pending_requests.lock().await.remove(&packet.conversation_id);

        match pending {
            Some(request) => {
                request.timer.abort();
                let _ = request.responder.send(Response {
                    conversation_id: packet.conversation_id,
                    peer: addr,
                    outcome: Outcome::Reply(packet.message),
                });
            }
            None => {
                let route = MessageRoute::new(addr, packet.conversation_id, packet.message);
                match self.inbound_tx.try_send(route) {
                    Ok(()) => {}
                    Err(TrySendError::Full(route)) => {
                        warn!("Inbound queue full, dropping {} from {}", route.message.name(), addr);
                    }
                    Err(TrySendError::Closed(_)) => debug!("Message handler gone, dropping message from {}", addr),
                }
            }
        }
    }
}
