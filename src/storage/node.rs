use crate::types::{Uid, error::DatabaseError, read_u16, read_u64};

/*
 * B+Tree Node Layout (payload of one data item)
 * ┌────────────┬──────────────┬─────────────┐
 * │ is_leaf(1) │ key_count(2) │ sibling(8)  │
 * ├────────────┴──────────────┴─────────────┤
 * │ [son 0(8)][key 0(8)] [son 1][key 1] ... │  BALANCE_NUMBER * 2 + 2 slots
 * └─────────────────────────────────────────┘
 * In a leaf, son k is the row uid stored under key k.
 * In an internal node, son k covers keys below key k (and at or above
 * key k-1). The rightmost internal node ends with a u64::MAX key.
 */
const OF_IS_LEAF: usize = 0;
const OF_KEY_COUNT: usize = OF_IS_LEAF + 1;
const OF_SIBLING: usize = OF_KEY_COUNT + 2;
const NODE_HEADER_SIZE: usize = OF_SIBLING + 8;
const PAIR_SIZE: usize = 16;

pub const BALANCE_NUMBER: usize = 32;
pub const NODE_SIZE: usize = NODE_HEADER_SIZE + PAIR_SIZE * (BALANCE_NUMBER * 2 + 2);

/// Where a descent continues from an internal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextHop {
    Child(Uid),
    Sibling(Uid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafRange {
    pub uids: Vec<Uid>,
    /// Sibling to continue scanning from, 0 when the range ends here.
    pub sibling: Uid,
}

#[derive(Debug, Clone)]
pub struct Node {
    raw: Vec<u8>,
}

impl Node {
    pub fn from_raw(uid: Uid, raw: Vec<u8>) -> Result<Self, DatabaseError> {
        if raw.len() != NODE_SIZE {
            return Err(DatabaseError::CorruptedIndex {
                uid,
                reason: format!("node is {} bytes, expected {}", raw.len(), NODE_SIZE),
            });
        }
        let node = Self { raw };
        if node.key_count() > BALANCE_NUMBER * 2 {
            return Err(DatabaseError::CorruptedIndex {
                uid,
                reason: format!("node holds {} keys", node.key_count()),
            });
        }
        Ok(node)
    }

    /// An empty leaf, used as the first root of a tree.
    pub fn new_nil_root() -> Self {
        let mut node = Self {
            raw: vec![0u8; NODE_SIZE],
        };
        node.set_leaf(true);
        node
    }

    /// An internal root over two children split at `key`.
    pub fn new_root(left: Uid, right: Uid, key: u64) -> Self {
        let mut node = Self {
            raw: vec![0u8; NODE_SIZE],
        };
        node.set_leaf(false);
        node.set_key_count(2);
        node.set_kth_son(0, left);
        node.set_kth_key(0, key);
        node.set_kth_son(1, right);
        node.set_kth_key(1, u64::MAX);
        node
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn is_leaf(&self) -> bool {
        self.raw[OF_IS_LEAF] == 1
    }

    fn set_leaf(&mut self, leaf: bool) {
        self.raw[OF_IS_LEAF] = leaf as u8;
    }

    pub fn key_count(&self) -> usize {
        read_u16(&self.raw, OF_KEY_COUNT) as usize
    }

    fn set_key_count(&mut self, count: usize) {
        self.raw[OF_KEY_COUNT..OF_SIBLING].copy_from_slice(&(count as u16).to_be_bytes());
    }

    pub fn sibling(&self) -> Uid {
        read_u64(&self.raw, OF_SIBLING)
    }

    pub fn set_sibling(&mut self, sibling: Uid) {
        self.raw[OF_SIBLING..NODE_HEADER_SIZE].copy_from_slice(&sibling.to_be_bytes());
    }

    fn pair_offset(kth: usize) -> usize {
        NODE_HEADER_SIZE + kth * PAIR_SIZE
    }

    pub fn kth_son(&self, kth: usize) -> Uid {
        read_u64(&self.raw, Self::pair_offset(kth))
    }

    fn set_kth_son(&mut self, kth: usize, uid: Uid) {
        let offset = Self::pair_offset(kth);
        self.raw[offset..offset + 8].copy_from_slice(&uid.to_be_bytes());
    }

    pub fn kth_key(&self, kth: usize) -> u64 {
        read_u64(&self.raw, Self::pair_offset(kth) + 8)
    }

    fn set_kth_key(&mut self, kth: usize, key: u64) {
        let offset = Self::pair_offset(kth) + 8;
        self.raw[offset..offset + 8].copy_from_slice(&key.to_be_bytes());
    }

    // moves pairs kth.. one slot right
    fn shift_from(&mut self, kth: usize) {
        let begin = Self::pair_offset(kth);
        let end = NODE_SIZE - PAIR_SIZE;
        self.raw.copy_within(begin..end, begin + PAIR_SIZE);
    }

    /// First child whose key is strictly greater than `key`. Falls through
    /// to the sibling, and the rightmost node falls back to its last child.
    pub fn search_next(&self, key: u64) -> Option<NextHop> {
        let count = self.key_count();
        for kth in 0..count {
            if key < self.kth_key(kth) {
                return Some(NextHop::Child(self.kth_son(kth)));
            }
        }
        match self.sibling() {
            0 if count > 0 => Some(NextHop::Child(self.kth_son(count - 1))),
            0 => None,
            sibling => Some(NextHop::Sibling(sibling)),
        }
    }

    pub fn leaf_search_range(&self, left_key: u64, right_key: u64) -> LeafRange {
        let count = self.key_count();
        let mut kth = 0;
        while kth < count && self.kth_key(kth) < left_key {
            kth += 1;
        }
        let mut uids = Vec::new();
        while kth < count && self.kth_key(kth) <= right_key {
            uids.push(self.kth_son(kth));
            kth += 1;
        }
        let sibling = if kth == count { self.sibling() } else { 0 };
        LeafRange { uids, sibling }
    }

    /// Inserts `(uid, key)` in sorted position. Returns false when the key
    /// belongs to a right sibling, leaving the node untouched.
    pub fn insert(&mut self, uid: Uid, key: u64) -> bool {
        let count = self.key_count();
        let mut kth = 0;
        while kth < count && self.kth_key(kth) < key {
            kth += 1;
        }
        if kth == count && self.sibling() != 0 {
            return false;
        }

        if self.is_leaf() {
            self.shift_from(kth);
            self.set_kth_key(kth, key);
            self.set_kth_son(kth, uid);
        } else if kth == count {
            // only reachable for an unbounded rightmost node
            self.set_kth_key(kth, key);
            self.set_kth_son(kth, uid);
        } else {
            // son kth now covers keys below `key`; the new son takes over
            // the range up to the old bound
            let old_bound = self.kth_key(kth);
            self.set_kth_key(kth, key);
            self.shift_from(kth + 1);
            self.set_kth_key(kth + 1, old_bound);
            self.set_kth_son(kth + 1, uid);
        }
        self.set_key_count(count + 1);
        true
    }

    pub fn needs_split(&self) -> bool {
        self.key_count() == BALANCE_NUMBER * 2
    }

    /// Moves the upper half into a new node that inherits this node's
    /// sibling. The caller links the two once the new node has a uid.
    pub fn split_high(&mut self) -> Node {
        let mut high = Node {
            raw: vec![0u8; NODE_SIZE],
        };
        high.set_leaf(self.is_leaf());
        high.set_key_count(BALANCE_NUMBER);
        high.set_sibling(self.sibling());
        let from = Self::pair_offset(BALANCE_NUMBER);
        let len = BALANCE_NUMBER * PAIR_SIZE;
        high.raw[NODE_HEADER_SIZE..NODE_HEADER_SIZE + len].copy_from_slice(&self.raw[from..from + len]);
        self.set_key_count(BALANCE_NUMBER);
        high
    }
}
