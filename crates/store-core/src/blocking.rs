//! Blocking list operations (C13, §4.7): BLPOP/BRPOP waiter registration
//! and handoff on push. The coordinator only tracks *who* is waiting on
//! *which* key; the decision to register a client as BLOCKED (because every
//! key named was empty) is the caller's.

use crate::client::{Client, ClientId, Deadline};
use crate::container::End;
use crate::db::Database;

/// Registers `client` as a waiter on every key in `keys`, FIFO per key
/// (§4.7 invariant).
pub fn register_wait(db: &mut Database, client: &mut Client, keys: Vec<Vec<u8>>, deadline: Deadline) {
    for key in &keys {
        db.blocking_keys.get_mut(key.as_slice()).map(|w| w.push(client.id));
        if !db.blocking_keys.contains_key(key.as_slice()) {
            db.blocking_keys.insert(key.clone(), vec![client.id]);
        }
    }
    client.block_on(keys, deadline);
}

/// Removes `client_id` from every key's waiter list (§4.7 invariant: "an
/// unblocked client is removed from every key it was waiting on").
pub fn unregister_wait(db: &mut Database, client_id: ClientId, keys: &[Vec<u8>]) {
    for key in keys {
        if let Some(waiters) = db.blocking_keys.get_mut(key.as_slice()) {
            waiters.retain(|&id| id != client_id);
            if waiters.is_empty() {
                db.blocking_keys.remove(key.as_slice());
            }
        }
    }
}

/// Called after a push into `key` lands. If a waiter exists, pops the
/// oldest one's id and, per §4.7, the caller delivers the just-pushed
/// element directly to it (never appended to the list). Returns `None` if
/// nobody is waiting — the caller should perform a normal push instead.
pub fn take_oldest_waiter(db: &mut Database, key: &[u8]) -> Option<ClientId> {
    let waiters = db.blocking_keys.get_mut(key)?;
    if waiters.is_empty() {
        return None;
    }
    let id = waiters.remove(0);
    if waiters.is_empty() {
        db.blocking_keys.remove(key);
    }
    Some(id)
}

/// The element/end pair a blocked BLPOP/BRPOP pops when a list is already
/// non-empty at dispatch time (§4.7's first branch, scanned left-to-right).
pub fn try_immediate_pop(db: &mut Database, keys: &[Vec<u8>], end: End) -> Option<(Vec<u8>, Vec<u8>)> {
    for key in keys {
        if let Some(value) = db.lookup_mut(key) {
            if let Some(list) = value.as_list_mut() {
                if !list.is_empty() {
                    let popped = match end {
                        End::Head => list.pop(End::Head),
                        End::Tail => list.pop(End::Tail),
                    };
                    if let Some(elem) = popped {
                        db.delete_if_empty(key);
                        return Some((key.clone(), elem));
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn immediate_pop_scans_left_to_right_and_stops_at_first_hit() {
        let mut db = Database::new();
        db.set(b"empty".to_vec(), Value::new_list());
        db.set(b"full".to_vec(), Value::new_list());
        db.dict.get_mut(b"full".as_slice()).unwrap().push(End::Tail, b"x".to_vec()).unwrap();
        let found = try_immediate_pop(&mut db, &[b"empty".to_vec(), b"full".to_vec()], End::Head);
        assert_eq!(found, Some((b"full".to_vec(), b"x".to_vec())));
    }

    #[test]
    fn waiter_registration_is_fifo_and_removable() {
        let mut db = Database::new();
        let mut c1 = Client::new(1, 0);
        let mut c2 = Client::new(2, 0);
        register_wait(&mut db, &mut c1, vec![b"k".to_vec()], Deadline::Never);
        register_wait(&mut db, &mut c2, vec![b"k".to_vec()], Deadline::Never);
        assert_eq!(take_oldest_waiter(&mut db, b"k"), Some(1));
        assert_eq!(take_oldest_waiter(&mut db, b"k"), Some(2));
        assert_eq!(take_oldest_waiter(&mut db, b"k"), None);
    }
}
