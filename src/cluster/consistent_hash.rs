//! Consistent-Hash Ring
//!
//! Each node address is hashed onto a 32-bit ring. A key belongs to the first
//! node at or after its own hash, wrapping around to the smallest position.
//!
//! ```text
//!            0 / 2^32
//!               │
//!        nodeC ●│        ● nodeA
//!               │
//!   key ─hash─> ○ ─────> ● nodeB   (first node clockwise)
//! ```
//!
//! The mapping depends only on the set of addresses, never on the order in
//! which they were added, so every node computes the same owner.

use std::collections::BTreeMap;

/// Hash function used to place nodes and keys on the ring.
pub type HashFn = fn(&[u8]) -> u32;

/// CRC-32 (IEEE), the default ring hash.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// A consistent-hash ring of node addresses.
///
/// # Example
///
/// ```
/// use ringkv::cluster::NodeMap;
///
/// let mut ring = NodeMap::new();
/// ring.add_node(["127.0.0.1:6379", "127.0.0.1:7379"]);
///
/// let owner = ring.pick_node(b"user:42").unwrap();
/// assert!(owner == "127.0.0.1:6379" || owner == "127.0.0.1:7379");
/// ```
#[derive(Debug, Clone)]
pub struct NodeMap {
    hash_fn: HashFn,
    /// Ring position -> address. On a collision the smaller address wins.
    ring: BTreeMap<u32, String>,
}

impl Default for NodeMap {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeMap {
    /// Creates an empty ring hashed with CRC-32.
    pub fn new() -> Self {
        Self::with_hash(crc32_ieee)
    }

    pub fn with_hash(hash_fn: HashFn) -> Self {
        Self {
            hash_fn,
            ring: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Adds node addresses. Empty addresses are ignored.
    pub fn add_node<I, S>(&mut self, addrs: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for addr in addrs {
            let addr = addr.as_ref();
            if addr.is_empty() {
                continue;
            }
            let hash = (self.hash_fn)(addr.as_bytes());
            match self.ring.get_mut(&hash) {
                Some(existing) if existing.as_str() <= addr => {}
                Some(existing) => *existing = addr.to_string(),
                None => {
                    self.ring.insert(hash, addr.to_string());
                }
            }
        }
    }

    /// Removes a node address. Returns true if it was on the ring.
    pub fn remove_node(&mut self, addr: &str) -> bool {
        let hash = (self.hash_fn)(addr.as_bytes());
        match self.ring.get(&hash) {
            Some(existing) if existing == addr => {
                self.ring.remove(&hash);
                true
            }
            _ => false,
        }
    }

    /// Returns the address owning `key`, or `None` if the ring is empty.
    pub fn pick_node(&self, key: &[u8]) -> Option<&str> {
        let hash = (self.hash_fn)(key);
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, addr)| addr.as_str())
    }

    /// Every address on the ring, in ring order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.ring.values().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parses the leading digits of the input, so tests can place keys exactly.
    fn numeric_hash(data: &[u8]) -> u32 {
        std::str::from_utf8(data)
            .ok()
            .and_then(|s| {
                s.chars()
                    .take_while(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .ok()
            })
            .unwrap_or(0)
    }

    #[test]
    fn test_empty_ring() {
        let ring = NodeMap::new();
        assert!(ring.is_empty());
        assert_eq!(ring.pick_node(b"anything"), None);
    }

    #[test]
    fn test_picks_first_position_at_or_after_key() {
        let mut ring = NodeMap::with_hash(numeric_hash);
        ring.add_node(["10", "20", "30"]);

        assert_eq!(ring.pick_node(b"5"), Some("10"));
        assert_eq!(ring.pick_node(b"10"), Some("10"));
        assert_eq!(ring.pick_node(b"11"), Some("20"));
        assert_eq!(ring.pick_node(b"30"), Some("30"));
        // Wraps to the smallest position
        assert_eq!(ring.pick_node(b"31"), Some("10"));
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let addrs = ["10.0.0.1:6379", "10.0.0.2:6379", "10.0.0.3:6379", "10.0.0.4:6379"];
        let mut forward = NodeMap::new();
        forward.add_node(addrs);
        let mut backward = NodeMap::new();
        backward.add_node(addrs.iter().rev());

        let mut one_by_one = NodeMap::new();
        for addr in addrs {
            one_by_one.add_node([addr]);
        }

        for i in 0..1000 {
            let key = format!("key:{}", i);
            let owner = forward.pick_node(key.as_bytes());
            assert_eq!(owner, backward.pick_node(key.as_bytes()));
            assert_eq!(owner, one_by_one.pick_node(key.as_bytes()));
        }
    }

    #[test]
    fn test_deterministic_with_crc32() {
        assert_eq!(crc32_ieee(b"123456789"), 0xCBF4_3926);

        let mut a = NodeMap::new();
        a.add_node(["127.0.0.1:6379", "127.0.0.1:7379"]);
        let mut b = NodeMap::new();
        b.add_node(["127.0.0.1:6379", "127.0.0.1:7379"]);
        for key in ["a", "b", "user:1", ""] {
            assert_eq!(a.pick_node(key.as_bytes()), b.pick_node(key.as_bytes()));
        }
    }

    #[test]
    fn test_ignores_empty_address() {
        let mut ring = NodeMap::new();
        ring.add_node(["", "127.0.0.1:6379"]);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_collision_keeps_smaller_address() {
        let mut ring = NodeMap::with_hash(|_| 7);
        ring.add_node(["b", "a", "c"]);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.pick_node(b"x"), Some("a"));
    }

    #[test]
    fn test_remove_node() {
        let mut ring = NodeMap::with_hash(numeric_hash);
        ring.add_node(["10", "20"]);
        assert!(ring.remove_node("10"));
        assert!(!ring.remove_node("10"));
        assert_eq!(ring.pick_node(b"5"), Some("20"));
        assert_eq!(ring.nodes().collect::<Vec<_>>(), vec!["20"]);
    }
}
