//! The per-process keyspace (C5, §3): `N` logical databases, each holding a
//! key→value dict, a TTL map, and the waiter maps blocking ops and swap
//! preload need. Lazy expiry lives here; the aggressive cron sweep lives in
//! `cron`.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::client::ClientId;
use crate::container::Dict;
use crate::value::Value;

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// One logical database (§3 "Database").
#[derive(Debug)]
pub struct Database {
    pub dict: Dict<Vec<u8>, Value>,
    pub expires: Dict<Vec<u8>, i64>,
    /// Clients blocked in BLPOP/BRPOP, keyed by list key, FIFO order (§4.7).
    pub blocking_keys: Dict<Vec<u8>, Vec<ClientId>>,
    /// Clients waiting on a swapped-out value to page in (§4.8).
    pub io_keys: Dict<Vec<u8>, Vec<ClientId>>,
    /// Present only for keys not resident in memory right now; absence
    /// means `Storage::Memory` (§4.8's state machine).
    pub swap_meta: Dict<Vec<u8>, crate::swap::SwapMeta>,
    /// Coarse last-touched timestamp, used only to rank swap-out candidates
    /// (§4.8 "Candidate selection") — not a real LRU clock.
    pub access_times: Dict<Vec<u8>, i64>,
}

impl Database {
    pub fn new() -> Self {
        Self {
            dict: Dict::new(),
            expires: Dict::new(),
            blocking_keys: Dict::new(),
            io_keys: Dict::new(),
            swap_meta: Dict::new(),
            access_times: Dict::new(),
        }
    }

    /// Removes `key` if its TTL has passed. Called before every lookup.
    pub fn expire_if_needed(&mut self, key: &[u8], now: i64) -> bool {
        if let Some(&at) = self.expires.get(key) {
            if at <= now {
                self.dict.remove(key);
                self.expires.remove(key);
                return true;
            }
        }
        false
    }

    pub fn lookup(&mut self, key: &[u8]) -> Option<&Value> {
        let now = unix_now();
        self.expire_if_needed(key, now);
        if self.dict.contains_key(key) {
            self.access_times.insert(key.to_vec(), now);
        }
        self.dict.get(key)
    }

    pub fn lookup_mut(&mut self, key: &[u8]) -> Option<&mut Value> {
        let now = unix_now();
        self.expire_if_needed(key, now);
        if self.dict.contains_key(key) {
            self.access_times.insert(key.to_vec(), now);
        }
        self.dict.get_mut(key)
    }

    pub fn contains(&mut self, key: &[u8]) -> bool {
        self.lookup(key).is_some()
    }

    pub fn set(&mut self, key: Vec<u8>, value: Value) {
        self.expires.remove(&key);
        self.swap_meta.remove(&key);
        self.access_times.insert(key.clone(), unix_now());
        self.dict.insert(key, value);
    }

    /// A key is resident unless it currently has swap metadata recorded
    /// against it (§4.8's state machine: absence of `swap_meta` means
    /// `Storage::Memory`).
    pub fn is_resident(&self, key: &[u8]) -> bool {
        !self.swap_meta.contains_key(key)
    }

    /// Up to `tries` random resident-key samples for the cron's swap-out
    /// candidate scan (§4.8 "Candidate selection"), each paired with its
    /// last-access time and estimated in-memory size.
    pub fn sample_swap_candidates(&self, tries: usize) -> Vec<(Vec<u8>, i64, usize)> {
        self.dict
            .sample(tries)
            .into_iter()
            .filter(|(k, _)| self.is_resident(k))
            .map(|(k, v)| {
                let at = self.access_times.get(k).copied().unwrap_or(0);
                (k.clone(), at, v.estimated_size())
            })
            .collect()
    }

    /// Removes `key`'s value if mutation left it an empty container (§4.9
    /// "any mutation that empties a container deletes the key").
    pub fn delete_if_empty(&mut self, key: &[u8]) {
        let empty = matches!(self.dict.get(key), Some(v) if v.is_empty_container());
        if empty {
            self.dict.remove(key);
            self.expires.remove(key);
        }
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Value> {
        self.expires.remove(key);
        self.swap_meta.remove(key);
        self.access_times.remove(key);
        self.dict.remove(key)
    }

    pub fn set_expire(&mut self, key: &[u8], at: i64) -> bool {
        if self.dict.contains_key(key) {
            self.expires.insert(key.to_vec(), at);
            true
        } else {
            false
        }
    }

    pub fn persist(&mut self, key: &[u8]) -> bool {
        self.expires.remove(key).is_some()
    }

    pub fn ttl(&mut self, key: &[u8]) -> Option<i64> {
        let now = unix_now();
        self.expires.get(key).map(|&at| (at - now).max(0))
    }

    pub fn flush(&mut self) {
        self.dict.clear();
        self.expires.clear();
        self.swap_meta.clear();
        self.access_times.clear();
    }

    /// Blocked clients and swap waiters never outlive the client (§4.7
    /// invariant); called when a client disconnects or unblocks.
    pub fn remove_waiter_everywhere(&mut self, client: ClientId) {
        for waiters in self.blocking_keys.iter_mut().map(|(_, v)| v) {
            waiters.retain(|&c| c != client);
        }
        for waiters in self.io_keys.iter_mut().map(|(_, v)| v) {
            waiters.retain(|&c| c != client);
        }
    }

    /// Up to `tries` random TTL samples for the cron's expire sweep (§4.4.8).
    pub fn sample_expires(&self, tries: usize) -> Vec<(Vec<u8>, i64)> {
        self.expires.sample(tries).into_iter().map(|(k, &v)| (k.clone(), v)).collect()
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-level store state: `N` databases plus process-wide save bookkeeping
/// consulted by the cron (§4.4.7 "dirty counter"/save rules).
#[derive(Debug)]
pub struct Store {
    pub databases: Vec<Database>,
    pub dirty: u64,
    pub last_save: i64,
}

impl Store {
    pub fn new(num_databases: usize) -> Self {
        Self {
            databases: (0..num_databases).map(|_| Database::new()).collect(),
            dirty: 0,
            last_save: unix_now(),
        }
    }

    pub fn db(&self, idx: usize) -> &Database {
        &self.databases[idx]
    }

    pub fn db_mut(&mut self, idx: usize) -> &mut Database {
        &mut self.databases[idx]
    }

    pub fn mark_dirty(&mut self, n: u64) {
        self.dirty += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expire_removes_key_and_ttl_entry_lazily() {
        let mut db = Database::new();
        db.set(b"k".to_vec(), Value::Str(crate::value::StrValue::Raw(b"v".to_vec())));
        db.set_expire(b"k", unix_now() - 1);
        assert!(db.lookup(b"k").is_none());
        assert!(!db.expires.contains_key(b"k".as_slice()));
    }

    #[test]
    fn mutation_emptying_a_container_deletes_the_key() {
        let mut db = Database::new();
        db.set(b"l".to_vec(), Value::new_list());
        db.dict.get_mut(b"l".as_slice()).unwrap().push(crate::container::End::Tail, b"x".to_vec()).unwrap();
        db.dict.get_mut(b"l".as_slice()).unwrap().as_list_mut().unwrap().pop(crate::container::End::Tail);
        db.delete_if_empty(b"l");
        assert!(db.dict.get(b"l".as_slice()).is_none());
    }
}
