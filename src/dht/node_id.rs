use crate::dht::KademliaError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::str::FromStr;

/// Size of an identifier in bits
pub const ID_BITS: usize = 160;

/// Size of an identifier in bytes
pub const ID_BYTES: usize = ID_BITS / 8;

/// Represents an identifier in the DHT, used both for nodes and content keys
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; ID_BYTES]);

impl NodeId {
    /// The all-zero identifier
    pub const ZERO: NodeId = NodeId([0u8; ID_BYTES]);

    /// Generates a random NodeId
    pub fn random() -> Self {
        let mut id = [0u8; ID_BYTES];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut id);
        Self(id)
    }

    /// Derives a NodeId from an arbitrary name (SHA-1, which is exactly 160 bits)
    pub fn from_name(name: &str) -> Self {
        let digest = ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, name.as_bytes());

        let mut id = [0u8; ID_BYTES];
        id.copy_from_slice(digest.as_ref());

        Self(id)
    }

    /// Calculates the XOR of two NodeIds
    pub fn xor(&self, other: &Self) -> NodeId {
        let mut result = [0u8; ID_BYTES];

        for (i, byte) in result.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        NodeId(result)
    }

    /// Number of leading zero bits
    pub fn leading_zero_bits(&self) -> usize {
        let mut prefix = 0;

        for &byte in self.0.iter() {
            if byte == 0 {
                prefix += 8;
            } else {
                prefix += byte.leading_zeros() as usize;
                break;
            }
        }

        prefix
    }

    /// Distance class between two ids, in `0..=ID_BITS`.
    ///
    /// This is `ID_BITS` minus the length of the common prefix, so identical
    /// ids are at distance 0 and ids differing in the first bit are at
    /// distance `ID_BITS`.
    pub fn distance(&self, other: &Self) -> usize {
        ID_BITS - self.xor(other).leading_zero_bits()
    }

    /// Orders `a` and `b` by their XOR distance to `self`
    pub fn cmp_distance(&self, a: &NodeId, b: &NodeId) -> Ordering {
        self.xor(a).cmp(&self.xor(b))
    }

    /// Generates an id that lies exactly `distance` away from this one.
    ///
    /// The bits above the distance class are copied from `self`, the bit at
    /// the class boundary is flipped and the remaining low bits are random.
    pub fn at_distance(&self, distance: usize) -> NodeId {
        if distance == 0 {
            return *self;
        }
        let distance = distance.min(ID_BITS);

        let mut mask = NodeId::random().0;
        let prefix = ID_BITS - distance;

        for bit in 0..ID_BITS {
            let byte = bit / 8;
            let flag = 0x80u8 >> (bit % 8);
            if bit < prefix {
                mask[byte] &= !flag;
            } else if bit == prefix {
                mask[byte] |= flag;
            }
        }

        self.xor(&NodeId(mask))
    }

    /// First 6 bytes in hex, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }

    /// Name of the directory content with this key is stored under
    pub fn shard(&self) -> String {
        hex::encode(&self.0[..1])
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl TryFrom<&[u8]> for NodeId {
    type Error = KademliaError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != ID_BYTES {
            return Err(KademliaError::InvalidNodeId(format!(
                "Invalid length: expected {}, got {}",
                ID_BYTES,
                bytes.len()
            )));
        }

        let mut id = [0u8; ID_BYTES];
        id.copy_from_slice(bytes);

        Ok(Self(id))
    }
}

impl FromStr for NodeId {
    type Err = KademliaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| KademliaError::InvalidNodeId(format!("Invalid NodeId hex: {}", e)))?;

        NodeId::try_from(bytes.as_slice())
    }
}

/// Represents a peer in the network: its identifier and the address it listens on.
///
/// Two `NodeInfo`s are equal when their ids are equal, whatever their address.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct NodeInfo {
    /// The node's ID
    pub id: NodeId,
    /// The node's UDP address
    pub addr: SocketAddr,
}

impl NodeInfo {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

impl PartialEq for NodeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeInfo {}

impl Hash for NodeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeInfo")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish()
    }
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id.short(), self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_with_first_byte(b: u8) -> NodeId {
        let mut bytes = [0u8; ID_BYTES];
        bytes[0] = b;
        NodeId(bytes)
    }

    #[test]
    fn test_self_distance_is_zero() {
        for _ in 0..50 {
            let a = NodeId::random();
            assert_eq!(a.distance(&a), 0);
            assert_eq!(a.xor(&a), NodeId::ZERO);
        }
    }

    #[test]
    fn test_xor_and_distance_are_symmetric() {
        for _ in 0..50 {
            let a = NodeId::random();
            let b = NodeId::random();
            assert_eq!(a.xor(&b), b.xor(&a));
            assert_eq!(a.distance(&b), b.distance(&a));
        }
    }

    #[test]
    fn test_leading_zero_bits() {
        assert_eq!(NodeId::ZERO.leading_zero_bits(), ID_BITS);
        assert_eq!(id_with_first_byte(0x80).leading_zero_bits(), 0);
        assert_eq!(id_with_first_byte(0x01).leading_zero_bits(), 7);

        let mut bytes = [0u8; ID_BYTES];
        bytes[1] = 0x20;
        assert_eq!(NodeId(bytes).leading_zero_bits(), 10);
    }

    #[test]
    fn test_distance_classes() {
        let zero = NodeId::ZERO;
        assert_eq!(zero.distance(&id_with_first_byte(0x80)), ID_BITS);
        assert_eq!(zero.distance(&id_with_first_byte(0x01)), ID_BITS - 7);

        let mut last = [0u8; ID_BYTES];
        last[ID_BYTES - 1] = 1;
        assert_eq!(zero.distance(&NodeId(last)), 1);
    }

    #[test]
    fn test_at_distance() {
        let local = NodeId::random();
        for d in 1..=ID_BITS {
            let other = local.at_distance(d);
            assert_eq!(local.distance(&other), d, "distance {}", d);
        }
        assert_eq!(local.at_distance(0), local);
    }

    #[test]
    fn test_cmp_distance() {
        let target = NodeId::ZERO;
        let near = id_with_first_byte(0x01);
        let far = id_with_first_byte(0x40);
        assert_eq!(target.cmp_distance(&near, &far), Ordering::Less);
        assert_eq!(target.cmp_distance(&far, &near), Ordering::Greater);
        assert_eq!(target.cmp_distance(&far, &far), Ordering::Equal);
    }

    #[test]
    fn test_hex_round_trip() {
        let id = NodeId::random();
        let text = id.to_string();
        assert_eq!(text.len(), ID_BYTES * 2);
        assert_eq!(text.parse::<NodeId>().unwrap(), id);
        assert!("abcd".parse::<NodeId>().is_err());
        assert!("zz".repeat(ID_BYTES).parse::<NodeId>().is_err());
    }

    #[test]
    fn test_from_name_is_stable() {
        assert_eq!(NodeId::from_name("alice"), NodeId::from_name("alice"));
        assert_ne!(NodeId::from_name("alice"), NodeId::from_name("bob"));
    }

    #[test]
    fn test_node_info_equality_ignores_address() {
        let id = NodeId::random();
        let a = NodeInfo::new(id, "127.0.0.1:4000".parse().unwrap());
        let b = NodeInfo::new(id, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(a, b);
    }
}
