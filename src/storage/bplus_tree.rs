use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    storage::{
        data_item::DataItem,
        data_manager::DataManager,
        node::{NextHop, Node},
    },
    types::{SUPER_XID, Uid, error::DatabaseError, read_u64},
};

/// Outcome of inserting into one node.
enum InsertStep {
    /// The key belongs further right; retry on this sibling.
    MoveRight(Uid),
    /// Inserted. Carries the new right node and its first key on a split.
    Done(Option<(Uid, u64)>),
}

/// Disk-resident B+Tree over u64 keys.
///
/// The tree is identified by its boot item, which holds the uid of the
/// current root. Nodes are plain data items written under [`SUPER_XID`].
pub struct BPlusTree {
    dm: Arc<DataManager>,
    boot_uid: Uid,
    boot: Arc<DataItem>,
    boot_lock: Mutex<()>,
}

impl BPlusTree {
    /// Creates an empty tree and returns its boot uid.
    pub fn create(dm: &DataManager) -> Result<Uid, DatabaseError> {
        let root_uid = dm.insert(SUPER_XID, Node::new_nil_root().raw())?;
        let boot_uid = dm.insert(SUPER_XID, &root_uid.to_be_bytes())?;
        debug!(boot_uid, root_uid, "created index");
        Ok(boot_uid)
    }

    pub fn load(boot_uid: Uid, dm: Arc<DataManager>) -> Result<Self, DatabaseError> {
        let boot = dm.read(boot_uid)?.ok_or(DatabaseError::CorruptedIndex {
            uid: boot_uid,
            reason: "boot item is missing".to_string(),
        })?;
        Ok(Self {
            dm,
            boot_uid,
            boot,
            boot_lock: Mutex::new(()),
        })
    }

    pub fn boot_uid(&self) -> Uid {
        self.boot_uid
    }

    pub fn root_uid(&self) -> Result<Uid, DatabaseError> {
        let _boot = self.boot_lock.lock();
        let data = self.boot.data();
        if data.len() < 8 {
            return Err(DatabaseError::CorruptedIndex {
                uid: self.boot_uid,
                reason: format!("boot item is {} bytes", data.len()),
            });
        }
        Ok(read_u64(&data, 0))
    }

    fn update_root_uid(&self, left: Uid, right: Uid, right_key: u64) -> Result<(), DatabaseError> {
        let _boot = self.boot_lock.lock();
        let root_uid = self
            .dm
            .insert(SUPER_XID, Node::new_root(left, right, right_key).raw())?;
        let mut guard = self.boot.before();
        guard.write_data(0, &root_uid.to_be_bytes())?;
        guard.after(SUPER_XID)?;
        debug!(root_uid, left, right, "index grew a new root");
        Ok(())
    }

    /// Copies a node out of its data item.
    fn load_node(&self, uid: Uid) -> Result<Node, DatabaseError> {
        let item = self.dm.read(uid)?.ok_or(DatabaseError::CorruptedIndex {
            uid,
            reason: "node is missing".to_string(),
        })?;
        let raw = item.data();
        self.dm.release(&item)?;
        Node::from_raw(uid, raw)
    }

    /// Descends to the leaf for `key`, returning it with the internal nodes
    /// passed on the way down. Each node is loaded once.
    fn search_leaf(&self, root_uid: Uid, key: u64) -> Result<(Uid, Vec<Uid>), DatabaseError> {
        let mut path = Vec::new();
        let mut node_uid = root_uid;
        loop {
            let node = self.load_node(node_uid)?;
            if node.is_leaf() {
                return Ok((node_uid, path));
            }
            match node.search_next(key) {
                Some(NextHop::Child(child)) => {
                    path.push(node_uid);
                    node_uid = child;
                }
                // a concurrent split moved the key range right
                Some(NextHop::Sibling(sibling)) => node_uid = sibling,
                None => {
                    return Err(DatabaseError::CorruptedIndex {
                        uid: node_uid,
                        reason: "internal node has no children".to_string(),
                    });
                }
            }
        }
    }

    pub fn search(&self, key: u64) -> Result<Vec<Uid>, DatabaseError> {
        self.search_range(key, key)
    }

    /// Uids of every key in `[left_key, right_key]`, in key order.
    pub fn search_range(&self, left_key: u64, right_key: u64) -> Result<Vec<Uid>, DatabaseError> {
        let (mut leaf_uid, _) = self.search_leaf(self.root_uid()?, left_key)?;
        let mut uids = Vec::new();
        loop {
            let range = self.load_node(leaf_uid)?.leaf_search_range(left_key, right_key);
            uids.extend(range.uids);
            if range.sibling == 0 {
                break;
            }
            leaf_uid = range.sibling;
        }
        Ok(uids)
    }

    pub fn insert(&self, key: u64, uid: Uid) -> Result<(), DatabaseError> {
        let root_uid = self.root_uid()?;
        let (leaf_uid, mut path) = self.search_leaf(root_uid, key)?;

        let mut split = self.insert_and_split(leaf_uid, uid, key)?;
        while let Some((new_son, new_key)) = split {
            match path.pop() {
                Some(parent) => split = self.insert_and_split(parent, new_son, new_key)?,
                None => {
                    self.update_root_uid(root_uid, new_son, new_key)?;
                    break;
                }
            }
        }
        Ok(())
    }

    fn insert_and_split(&self, mut node_uid: Uid, uid: Uid, key: u64) -> Result<Option<(Uid, u64)>, DatabaseError> {
        loop {
            let item = self.dm.read(node_uid)?.ok_or(DatabaseError::CorruptedIndex {
                uid: node_uid,
                reason: "node is missing".to_string(),
            })?;
            let step = self.insert_into(&item, uid, key);
            self.dm.release(&item)?;
            match step? {
                InsertStep::MoveRight(sibling) => node_uid = sibling,
                InsertStep::Done(split) => return Ok(split),
            }
        }
    }

    fn insert_into(&self, item: &DataItem, uid: Uid, key: u64) -> Result<InsertStep, DatabaseError> {
        let mut guard = item.before();
        let mut node = Node::from_raw(item.uid(), guard.data())?;
        if !node.insert(uid, key) {
            let sibling = node.sibling();
            guard.un_before();
            return Ok(InsertStep::MoveRight(sibling));
        }

        let split = if node.needs_split() {
            let high = node.split_high();
            let high_uid = self.dm.insert(SUPER_XID, high.raw())?;
            node.set_sibling(high_uid);
            debug!(node = item.uid(), high_uid, "split index node");
            Some((high_uid, high.kth_key(0)))
        } else {
            None
        };
        guard.write_data(0, node.raw())?;
        guard.after(SUPER_XID)?;
        Ok(InsertStep::Done(split))
    }

    /// Unpins the boot item.
    pub fn close(&self) -> Result<(), DatabaseError> {
        self.dm.release(&self.boot)
    }
}
