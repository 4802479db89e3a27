//! Master/replica replication (C12, §4.11): master-side bulk transfer of a
//! snapshot followed by a live command stream, and the replica-side
//! synchronous bootstrap.

use crate::client::ClientId;

/// Master-side bootstrap state for one replica connection (§4.11 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaState {
    WaitBgsaveStart,
    WaitBgsaveEnd,
    SendBulk,
    Online,
}

/// Replica-side connection state toward its master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterLinkState {
    Connect,
    Connecting,
    Sync,
    Connected,
}

pub struct ReplicaLink {
    pub client_id: ClientId,
    pub state: ReplicaState,
    /// DB index of the last command replicated to this replica; forces a
    /// `SELECT` emission whenever the target db changes (§4.11).
    pub last_sent_db: Option<usize>,
    /// Buffered mutations accumulated while a background save that this
    /// replica is waiting on is still running.
    pub pending_diff: Vec<u8>,
    pub bulk_offset: usize,
}

impl ReplicaLink {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            state: ReplicaState::WaitBgsaveStart,
            last_sent_db: None,
            pending_diff: Vec::new(),
            bulk_offset: 0,
        }
    }
}

/// Tracks every connected replica and fans mutations out to the ones that
/// are caught up (§4.11 "per-command fan-out").
pub struct ReplicationState {
    pub replicas: Vec<ReplicaLink>,
    /// `true` while a background save that at least one WAIT_BGSAVE_END
    /// replica is waiting on is in flight.
    pub save_in_progress_for_replicas: bool,
}

impl ReplicationState {
    pub fn new() -> Self {
        Self {
            replicas: Vec::new(),
            save_in_progress_for_replicas: false,
        }
    }

    /// A new replica arrives and sends SYNC. If another replica is already
    /// WAIT_BGSAVE_END, share its pending snapshot+diff stream (§4.11,
    /// "copy the first's pending reply list") rather than starting a second
    /// background save.
    pub fn on_sync(&mut self, client_id: ClientId) -> ReplicaState {
        let sharing = self
            .replicas
            .iter()
            .find(|r| r.state == ReplicaState::WaitBgsaveEnd)
            .map(|r| r.pending_diff.clone());
        let mut link = ReplicaLink::new(client_id);
        let state = if let Some(diff) = sharing {
            link.state = ReplicaState::WaitBgsaveEnd;
            link.pending_diff = diff;
            ReplicaState::WaitBgsaveEnd
        } else {
            ReplicaState::WaitBgsaveStart
        };
        self.replicas.push(link);
        state
    }

    pub fn remove(&mut self, client_id: ClientId) {
        self.replicas.retain(|r| r.client_id != client_id);
    }

    /// Encodes the command as a synthetic multi-bulk and appends it to
    /// every ONLINE replica's outbound stream and every WAIT_BGSAVE_END
    /// replica's diff buffer; returns the ids that must also emit a SELECT
    /// first because their last-sent db differs.
    pub fn fan_out(&mut self, db_index: usize, argv: &[Vec<u8>]) -> Vec<ClientId> {
        let encoded = crate::protocol::encode_multibulk_command(argv);
        let mut needs_select = Vec::new();
        for link in &mut self.replicas {
            match link.state {
                ReplicaState::Online => {
                    if link.last_sent_db != Some(db_index) {
                        needs_select.push(link.client_id);
                        link.last_sent_db = Some(db_index);
                    }
                }
                ReplicaState::WaitBgsaveEnd => {
                    link.pending_diff.extend_from_slice(&encoded);
                    continue;
                }
                ReplicaState::WaitBgsaveStart | ReplicaState::SendBulk => continue,
            }
        }
        needs_select
    }
}

impl Default for ReplicationState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_replica_joining_during_wait_shares_the_first_diff() {
        let mut repl = ReplicationState::new();
        let first = repl.on_sync(1);
        assert_eq!(first, ReplicaState::WaitBgsaveStart);
        repl.replicas[0].state = ReplicaState::WaitBgsaveEnd;
        repl.replicas[0].pending_diff = b"*1\r\n$4\r\nPING\r\n".to_vec();
        let second = repl.on_sync(2);
        assert_eq!(second, ReplicaState::WaitBgsaveEnd);
        assert_eq!(repl.replicas[1].pending_diff, repl.replicas[0].pending_diff);
    }

    #[test]
    fn online_replica_gets_select_once_per_db_change() {
        let mut repl = ReplicationState::new();
        repl.on_sync(1);
        repl.replicas[0].state = ReplicaState::Online;
        let needs = repl.fan_out(2, &[b"SET".to_vec(), b"a".to_vec(), b"1".to_vec()]);
        assert_eq!(needs, vec![1]);
        let needs_again = repl.fan_out(2, &[b"SET".to_vec(), b"a".to_vec(), b"2".to_vec()]);
        assert!(needs_again.is_empty());
    }
}
