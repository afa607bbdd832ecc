use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters kept by the transport
#[derive(Debug, Default)]
pub struct TransportStats {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    find_node_sent: AtomicU64,
    find_node_replies: AtomicU64,
}

impl TransportStats {
    pub fn record_sent(&self, bytes: usize, find_node: bool) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        if find_node {
            self.find_node_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_received(&self, bytes: usize, find_node_reply: bool) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        if find_node_reply {
            self.find_node_replies.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Counters kept by the node's operations
#[derive(Debug, Default)]
pub struct NodeStats {
    content_lookups: AtomicU64,
    failed_lookups: AtomicU64,
    lookup_time_ms: AtomicU64,
    route_length: AtomicU64,
    bootstrap_time_ms: AtomicU64,
}

impl NodeStats {
    pub fn record_lookup(&self, elapsed: Duration, route_length: usize, found: bool) {
        self.content_lookups.fetch_add(1, Ordering::Relaxed);
        self.lookup_time_ms.fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.route_length.fetch_add(route_length as u64, Ordering::Relaxed);
        if !found {
            self.failed_lookups.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_bootstrap(&self, elapsed: Duration) {
        self.bootstrap_time_ms.store(elapsed.as_millis() as u64, Ordering::Relaxed);
    }
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub find_node_sent: u64,
    pub find_node_replies: u64,
    pub content_lookups: u64,
    pub failed_lookups: u64,
    pub lookup_time_ms: u64,
    pub route_length: u64,
    pub bootstrap_time_ms: u64,
}

impl StatsSnapshot {
    pub fn collect(transport: &TransportStats, node: &NodeStats) -> Self {
        let get = |v: &AtomicU64| v.load(Ordering::Relaxed);

        Self {
            packets_sent: get(&transport.packets_sent),
            packets_received: get(&transport.packets_received),
            bytes_sent: get(&transport.bytes_sent),
            bytes_received: get(&transport.bytes_received),
            find_node_sent: get(&transport.find_node_sent),
            find_node_replies: get(&transport.find_node_replies),
            content_lookups: get(&node.content_lookups),
            failed_lookups: get(&node.failed_lookups),
            lookup_time_ms: get(&node.lookup_time_ms),
            route_length: get(&node.route_length),
            bootstrap_time_ms: get(&node.bootstrap_time_ms),
        }
    }

    /// Mean content lookup time in milliseconds
    pub fn average_lookup_time(&self) -> f64 {
        average(self.lookup_time_ms, self.content_lookups)
    }

    pub fn average_route_length(&self) -> f64 {
        average(self.route_length, self.content_lookups)
    }

    /// Share of content lookups that returned a value
    pub fn success_rate(&self) -> f64 {
        if self.content_lookups == 0 {
            return 0.0;
        }
        1.0 - self.failed_lookups as f64 / self.content_lookups as f64
    }
}

fn average(total: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bootstrap time: {} ms", self.bootstrap_time_ms)?;
        writeln!(f, "Packets sent/received: {}/{}", self.packets_sent, self.packets_received)?;
        writeln!(f, "Bytes sent/received: {}/{}", self.bytes_sent, self.bytes_received)?;
        writeln!(f, "FindNode sent/replies: {}/{}", self.find_node_sent, self.find_node_replies)?;
        writeln!(f, "Content lookups: {} ({} failed)", self.content_lookups, self.failed_lookups)?;
        writeln!(f, "Average lookup time: {:.2} ms", self.average_lookup_time())?;
        write!(f, "Average route length: {:.2}", self.average_route_length())
    }
}
