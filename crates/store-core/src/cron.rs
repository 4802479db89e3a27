//! The recurring ~1 Hz housekeeping task (§4.4): hash-table shrink, idle and
//! blocked client reaping, the expire sweep, and save-rule evaluation. The
//! event loop in `server` calls `tick` once per timer fire and acts on the
//! report it returns.

use std::collections::HashMap;

use crate::client::{Client, ClientId, Deadline};
use crate::config::Config;
use crate::db::Store;
use crate::protocol::Reply;
use crate::replication::MasterLinkState;

/// Up to 100 samples per expire-sweep pass, looping while at least a quarter
/// came back expired (§4.4 step 8).
const EXPIRE_SAMPLE_TRIES: usize = 100;
const EXPIRE_LOOP_THRESHOLD: f64 = 0.25;

/// Random swap candidates per database for `maxmemory`-style eviction
/// (§4.8 "Candidate selection"): at most 5 samples a tick, matching the
/// expire sweep's own small-sample-loop discipline.
const SWAP_CANDIDATE_SAMPLE_TRIES: usize = 5;

#[derive(Debug, Default)]
pub struct CronReport {
    pub clients_closed: Vec<ClientId>,
    pub clients_timed_out_blocking: Vec<ClientId>,
    pub expired_keys: usize,
    pub save_triggered: bool,
    pub should_start_master_handshake: bool,
    /// `(db_index, key)` pairs the caller should hand to the swap
    /// subsystem as `PREPARE_SWAP` jobs.
    pub swap_candidates: Vec<(usize, Vec<u8>)>,
}

/// One cron tick. `now` is the cached Unix time sampled once by the caller
/// (§4.4 step 1 — "accessing a global is cheaper than a syscall").
#[allow(clippy::too_many_arguments)]
pub fn tick(
    store: &mut Store,
    clients: &mut HashMap<ClientId, Client>,
    config: &Config,
    background_save_running: bool,
    seconds_since_save: u64,
    now: i64,
    master_link_state: Option<&mut MasterLinkState>,
) -> CronReport {
    let mut report = CronReport::default();

    for db in &mut store.databases {
        db.dict.maybe_shrink(background_save_running);
    }

    tracing::info!(clients = clients.len(), "cron tick");

    if config.timeout > 0 {
        let timeout = config.timeout as i64;
        for client in clients.values() {
            if client.is_idle_closeable() && now - client.last_interaction > timeout {
                report.clients_closed.push(client.id);
            }
        }
    }

    for client in clients.values_mut() {
        let Some(Deadline::At(deadline)) = client.block_deadline else {
            continue;
        };
        if now >= deadline {
            let db = store.db_mut(client.db_index);
            crate::blocking::unregister_wait(db, client.id, &client.blocked_on);
            client.unblock();
            client.reply(Reply::nil_multibulk());
            report.clients_timed_out_blocking.push(client.id);
        }
    }

    if !background_save_running && crate::persistence::should_trigger_save(&config.save_rules, seconds_since_save, store.dirty) {
        report.save_triggered = true;
    }

    for db in &mut store.databases {
        loop {
            let sample = db.sample_expires(EXPIRE_SAMPLE_TRIES);
            if sample.is_empty() {
                break;
            }
            let mut expired = 0;
            for (key, _) in &sample {
                if db.expire_if_needed(key, now) {
                    expired += 1;
                }
            }
            report.expired_keys += expired;
            if (expired as f64) / (sample.len() as f64) <= EXPIRE_LOOP_THRESHOLD {
                break;
            }
        }
    }

    if config.vm_enabled {
        for (db_index, db) in store.databases.iter().enumerate() {
            let samples = db.sample_swap_candidates(SWAP_CANDIDATE_SAMPLE_TRIES);
            if let Some(key) = crate::swap::pick_candidate(&samples, now) {
                report.swap_candidates.push((db_index, key));
            }
        }
    }

    if let Some(state) = master_link_state {
        if *state == MasterLinkState::Connect {
            *state = MasterLinkState::Connecting;
            report.should_start_master_handshake = true;
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{StrValue, Value};

    #[test]
    fn idle_client_past_timeout_is_reported_closed() {
        let mut store = Store::new(1);
        let mut clients = HashMap::new();
        let mut c = Client::new(1, 0);
        c.last_interaction = 0;
        clients.insert(1, c);
        let mut config = Config::default();
        config.timeout = 10;
        let report = tick(&mut store, &mut clients, &config, false, 1000, 1000, None);
        assert_eq!(report.clients_closed, vec![1]);
    }

    #[test]
    fn blocked_client_past_deadline_is_unblocked_with_null_reply() {
        let mut store = Store::new(1);
        let mut clients = HashMap::new();
        let mut c = Client::new(1, 0);
        crate::blocking::register_wait(store.db_mut(0), &mut c, vec![b"k".to_vec()], Deadline::At(5));
        clients.insert(1, c);
        let config = Config::default();
        let report = tick(&mut store, &mut clients, &config, false, 0, 10, None);
        assert_eq!(report.clients_timed_out_blocking, vec![1]);
        let c = clients.get(&1).unwrap();
        assert!(!c.flags.contains(crate::client::ClientFlags::BLOCKED));
        assert_eq!(c.reply_queue.len(), 1);
    }

    #[test]
    fn expire_sweep_removes_due_keys() {
        let mut store = Store::new(1);
        let db = store.db_mut(0);
        db.set(b"k".to_vec(), Value::Str(StrValue::from_bytes(b"v".to_vec())));
        db.set_expire(b"k", 0);
        let mut clients = HashMap::new();
        let config = Config::default();
        let report = tick(&mut store, &mut clients, &config, false, 0, 100, None);
        assert_eq!(report.expired_keys, 1);
    }

    #[test]
    fn master_connect_state_transitions_to_connecting() {
        let mut store = Store::new(1);
        let mut clients = HashMap::new();
        let config = Config::default();
        let mut link_state = MasterLinkState::Connect;
        let report = tick(&mut store, &mut clients, &config, false, 0, 0, Some(&mut link_state));
        assert!(report.should_start_master_handshake);
        assert_eq!(link_state, MasterLinkState::Connecting);
    }
}
