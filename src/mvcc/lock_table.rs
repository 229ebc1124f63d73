//! Row ownership between transactions and wait-for deadlock detection.
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::types::{Uid, Xid, error::DatabaseError};

#[derive(Default)]
struct Latch {
    granted: Mutex<bool>,
    cond: Condvar,
}

/// Blocks a transaction until the uid it asked for is handed to it.
#[derive(Clone, Default)]
pub struct WaitHandle {
    latch: Arc<Latch>,
}

impl WaitHandle {
    pub fn wait(&self) {
        let mut granted = self.latch.granted.lock();
        while !*granted {
            self.latch.cond.wait(&mut granted);
        }
    }

    pub fn is_granted(&self) -> bool {
        *self.latch.granted.lock()
    }

    fn grant(&self) {
        *self.latch.granted.lock() = true;
        self.latch.cond.notify_all();
    }
}

#[derive(Default)]
struct WaitGraph {
    // uids held by each xid
    x2u: HashMap<Xid, Vec<Uid>>,
    // owner of each uid
    u2x: HashMap<Uid, Xid>,
    // xids queued for each uid, oldest first
    waiters: HashMap<Uid, VecDeque<Xid>>,
    // the uid each xid is blocked on
    waiting_on: HashMap<Xid, Uid>,
    handles: HashMap<Xid, WaitHandle>,
}

impl WaitGraph {
    fn holds(&self, xid: Xid, uid: Uid) -> bool {
        self.x2u.get(&xid).is_some_and(|uids| uids.contains(&uid))
    }

    fn grant(&mut self, xid: Xid, uid: Uid) {
        self.u2x.insert(uid, xid);
        self.x2u.entry(xid).or_default().push(uid);
    }

    fn dequeue(&mut self, uid: Uid, xid: Xid) {
        if let Some(queue) = self.waiters.get_mut(&uid) {
            queue.retain(|&waiter| waiter != xid);
            if queue.is_empty() {
                self.waiters.remove(&uid);
            }
        }
    }

    fn has_deadlock(&self) -> bool {
        let mut stamps: HashMap<Xid, u64> = HashMap::new();
        let mut stamp = 0;
        for &xid in self.x2u.keys() {
            if stamps.contains_key(&xid) {
                continue;
            }
            stamp += 1;
            if self.closes_cycle(xid, stamp, &mut stamps) {
                return true;
            }
        }
        false
    }

    // follows the blocked-behind chain from `xid`
    fn closes_cycle(&self, mut xid: Xid, stamp: u64, stamps: &mut HashMap<Xid, u64>) -> bool {
        loop {
            if let Some(&seen) = stamps.get(&xid) {
                return seen == stamp;
            }
            stamps.insert(xid, stamp);
            let Some(uid) = self.waiting_on.get(&xid) else {
                return false;
            };
            let Some(&owner) = self.u2x.get(uid) else {
                return false;
            };
            xid = owner;
        }
    }

    /// Hands `uid` to the oldest transaction still waiting for it.
    fn select_new_owner(&mut self, uid: Uid) {
        self.u2x.remove(&uid);
        let Some(mut queue) = self.waiters.remove(&uid) else {
            return;
        };
        while let Some(xid) = queue.pop_front() {
            if self.waiting_on.get(&xid) != Some(&uid) {
                continue;
            }
            self.waiting_on.remove(&xid);
            self.grant(xid, uid);
            if let Some(handle) = self.handles.remove(&xid) {
                handle.grant();
            }
            debug!(xid, uid, "lock handed over");
            break;
        }
        if !queue.is_empty() {
            self.waiters.insert(uid, queue);
        }
    }
}

#[derive(Default)]
pub struct LockTable {
    graph: Mutex<WaitGraph>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks for ownership of `uid`.
    ///
    /// Returns `None` when granted on the spot, or a handle to wait on when
    /// another transaction holds it. Fails with `Deadlock` if waiting would
    /// close a cycle; the request is then withdrawn.
    pub fn add(&self, xid: Xid, uid: Uid) -> Result<Option<WaitHandle>, DatabaseError> {
        let mut graph = self.graph.lock();
        if graph.holds(xid, uid) {
            return Ok(None);
        }
        if !graph.u2x.contains_key(&uid) {
            graph.grant(xid, uid);
            return Ok(None);
        }

        graph.waiting_on.insert(xid, uid);
        graph.waiters.entry(uid).or_default().push_back(xid);
        if graph.has_deadlock() {
            graph.waiting_on.remove(&xid);
            graph.dequeue(uid, xid);
            warn!(xid, uid, "deadlock detected");
            return Err(DatabaseError::Deadlock { xid });
        }

        let handle = WaitHandle::default();
        graph.handles.insert(xid, handle.clone());
        debug!(xid, uid, "waiting for lock");
        Ok(Some(handle))
    }

    /// Releases everything `xid` holds and drops any request it has pending.
    pub fn remove(&self, xid: Xid) {
        let mut graph = self.graph.lock();
        if let Some(uids) = graph.x2u.remove(&xid) {
            for uid in uids {
                graph.select_new_owner(uid);
            }
        }
        if let Some(uid) = graph.waiting_on.remove(&xid) {
            graph.dequeue(uid, xid);
        }
        graph.handles.remove(&xid);
    }

    pub fn owner(&self, uid: Uid) -> Option<Xid> {
        self.graph.lock().u2x.get(&uid).copied()
    }
}
