//! Shared, pre-built reply atoms (§4.2): a handful of replies are so common
//! that building them fresh per client wastes an allocation. Since replies
//! here are plain owned `Reply` values rather than refcounted cells, the
//! "sharing" is just cheap, pre-built `Reply::clone()`s off a single table —
//! there is no destructor-avoidance concern to model in safe Rust.

use crate::protocol::Reply;

pub struct SharedReplies {
    pub ok: Reply,
    pub zero: Reply,
    pub one: Reply,
    pub pong: Reply,
    pub nil_bulk: Reply,
    pub nil_multibulk: Reply,
    pub empty_multibulk: Reply,
    pub queued: Reply,
    select_cache: Vec<Reply>,
}

const SELECT_CACHE_SIZE: usize = 16;

impl SharedReplies {
    pub fn new() -> Self {
        let select_cache = (0..SELECT_CACHE_SIZE)
            .map(|i| Reply::Status(format!("SELECT {i}")))
            .collect();
        Self {
            ok: Reply::Status("OK".into()),
            zero: Reply::Integer(0),
            one: Reply::Integer(1),
            pong: Reply::Status("PONG".into()),
            nil_bulk: Reply::nil_bulk(),
            nil_multibulk: Reply::nil_multibulk(),
            empty_multibulk: Reply::multibulk(Vec::new()),
            queued: Reply::Status("QUEUED".into()),
            select_cache,
        }
    }

    /// A `SELECT <n>` status line for small `n`, matching §4.2's "per-DB
    /// SELECT for small k" without materialising a fresh string each time.
    pub fn select_command_label(&self, db: usize) -> Reply {
        self.select_cache
            .get(db)
            .cloned()
            .unwrap_or_else(|| Reply::Status(format!("SELECT {db}")))
    }
}

impl Default for SharedReplies {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_cache_covers_small_indices_and_falls_back() {
        let shared = SharedReplies::new();
        assert!(matches!(shared.select_command_label(3), Reply::Status(s) if s == "SELECT 3"));
        assert!(matches!(shared.select_command_label(200), Reply::Status(s) if s == "SELECT 200"));
    }
}
