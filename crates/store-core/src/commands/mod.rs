//! Command dispatch table (C7, §4.5): name → handler, arity check, and the
//! `dirty` signal the caller uses to decide whether to mirror a command to
//! the append log and any connected replicas.

pub mod generic;
pub mod hashes;
pub mod lists;
pub mod sets;
pub mod sort;
pub mod strings;
pub mod zsets;

use crate::bitflags_like;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::protocol::Reply;

pub use hashes::HashLimits;

/// Arity contract for one command: `Exact(n)` demands exactly `n` arguments
/// (including the command name itself); `AtLeast(n)` is an open-ended tail
/// (e.g. `MSET key value [key value ...]`).
#[derive(Clone, Copy)]
enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    fn matches(self, argc: usize) -> bool {
        match self {
            Arity::Exact(n) => argc == n,
            Arity::AtLeast(n) => argc >= n,
        }
    }
}

bitflags_like! {
    pub struct CommandFlags: u8 {
        /// Ever mutates the keyspace; gets mirrored to the append log and
        /// connected replicas when it reports `dirty` (§4.5/§4.6).
        const WRITE = 1 << 0;
        /// Rejected with `DenyOom` once `maxmemory` is exceeded (§4.5 step
        /// 6, §7) — only commands that can grow resident memory carry it.
        const DENYOOM = 1 << 1;
        /// Its last inline-dialect token may be a bulk-length escape hatch
        /// instead of the payload itself (§4.3's old protocol).
        const BULK = 1 << 2;
    }
}

/// Which argv positions hold keys, mirroring the original command table's
/// `firstkey`/`lastkey`/`keystep` triple. `first == 0` means "no keys"
/// (e.g. `PING`). A negative `last` counts back from the end of `argv`.
#[derive(Clone, Copy)]
pub struct KeySpec {
    pub first: usize,
    pub last: isize,
    pub step: usize,
}

impl KeySpec {
    const NONE: KeySpec = KeySpec { first: 0, last: 0, step: 0 };
    const ONE: KeySpec = KeySpec { first: 1, last: 1, step: 1 };
    const ALL_FROM_1: KeySpec = KeySpec { first: 1, last: -1, step: 1 };
    const EVERY_OTHER_FROM_1: KeySpec = KeySpec { first: 1, last: -1, step: 2 };
}

struct CommandSpec {
    name: &'static str,
    arity: Arity,
    flags: CommandFlags,
    keys: KeySpec,
}

const fn spec(name: &'static str, arity: Arity, flags: CommandFlags, keys: KeySpec) -> CommandSpec {
    CommandSpec { name, arity, flags, keys }
}

const R: CommandFlags = CommandFlags::empty();
const W: CommandFlags = CommandFlags::WRITE;

const COMMAND_TABLE: &[CommandSpec] = &[
    spec("GET", Arity::Exact(2), R, KeySpec::ONE),
    spec("SET", Arity::Exact(3), CommandFlags(W.0 | CommandFlags::DENYOOM.0 | CommandFlags::BULK.0), KeySpec::ONE),
    spec("SETNX", Arity::Exact(3), CommandFlags(W.0 | CommandFlags::DENYOOM.0 | CommandFlags::BULK.0), KeySpec::ONE),
    spec("GETSET", Arity::Exact(3), CommandFlags(W.0 | CommandFlags::DENYOOM.0 | CommandFlags::BULK.0), KeySpec::ONE),
    spec("APPEND", Arity::Exact(3), CommandFlags(W.0 | CommandFlags::DENYOOM.0 | CommandFlags::BULK.0), KeySpec::ONE),
    spec("STRLEN", Arity::Exact(2), R, KeySpec::ONE),
    spec("SUBSTR", Arity::Exact(4), R, KeySpec::ONE),
    spec("GETRANGE", Arity::Exact(4), R, KeySpec::ONE),
    spec("INCR", Arity::Exact(2), W, KeySpec::ONE),
    spec("DECR", Arity::Exact(2), W, KeySpec::ONE),
    spec("INCRBY", Arity::Exact(3), W, KeySpec::ONE),
    spec("DECRBY", Arity::Exact(3), W, KeySpec::ONE),
    spec("MSET", Arity::AtLeast(3), CommandFlags(W.0 | CommandFlags::DENYOOM.0), KeySpec::EVERY_OTHER_FROM_1),
    spec("MGET", Arity::AtLeast(2), R, KeySpec::ALL_FROM_1),
    spec("RPUSH", Arity::AtLeast(3), CommandFlags(W.0 | CommandFlags::DENYOOM.0), KeySpec::ONE),
    spec("LPUSH", Arity::AtLeast(3), CommandFlags(W.0 | CommandFlags::DENYOOM.0), KeySpec::ONE),
    spec("LPOP", Arity::Exact(2), W, KeySpec::ONE),
    spec("RPOP", Arity::Exact(2), W, KeySpec::ONE),
    spec("LLEN", Arity::Exact(2), R, KeySpec::ONE),
    spec("LINDEX", Arity::Exact(3), R, KeySpec::ONE),
    spec("LSET", Arity::Exact(4), CommandFlags(W.0 | CommandFlags::DENYOOM.0 | CommandFlags::BULK.0), KeySpec::ONE),
    spec("LRANGE", Arity::Exact(4), R, KeySpec::ONE),
    spec("LTRIM", Arity::Exact(4), W, KeySpec::ONE),
    spec("LREM", Arity::Exact(4), W, KeySpec::ONE),
    spec("SADD", Arity::AtLeast(3), CommandFlags(W.0 | CommandFlags::DENYOOM.0), KeySpec::ONE),
    spec("SREM", Arity::AtLeast(3), W, KeySpec::ONE),
    spec("SISMEMBER", Arity::Exact(3), CommandFlags(R.0 | CommandFlags::BULK.0), KeySpec::ONE),
    spec("SCARD", Arity::Exact(2), R, KeySpec::ONE),
    spec("SMEMBERS", Arity::Exact(2), R, KeySpec::ONE),
    spec("SINTER", Arity::AtLeast(2), R, KeySpec::ALL_FROM_1),
    spec("SUNION", Arity::AtLeast(2), R, KeySpec::ALL_FROM_1),
    spec("SDIFF", Arity::AtLeast(2), R, KeySpec::ALL_FROM_1),
    spec("SPOP", Arity::Exact(2), W, KeySpec::ONE),
    spec("SRANDMEMBER", Arity::Exact(2), R, KeySpec::ONE),
    spec("HSET", Arity::Exact(4), CommandFlags(W.0 | CommandFlags::DENYOOM.0 | CommandFlags::BULK.0), KeySpec::ONE),
    spec("HMSET", Arity::AtLeast(4), CommandFlags(W.0 | CommandFlags::DENYOOM.0), KeySpec::ONE),
    spec("HGET", Arity::Exact(3), R, KeySpec::ONE),
    spec("HMGET", Arity::AtLeast(3), R, KeySpec::ONE),
    spec("HDEL", Arity::AtLeast(3), W, KeySpec::ONE),
    spec("HEXISTS", Arity::Exact(3), R, KeySpec::ONE),
    spec("HLEN", Arity::Exact(2), R, KeySpec::ONE),
    spec("HGETALL", Arity::Exact(2), R, KeySpec::ONE),
    spec("HKEYS", Arity::Exact(2), R, KeySpec::ONE),
    spec("HVALS", Arity::Exact(2), R, KeySpec::ONE),
    spec("ZADD", Arity::AtLeast(4), CommandFlags(W.0 | CommandFlags::DENYOOM.0), KeySpec::ONE),
    spec("ZINCRBY", Arity::Exact(4), CommandFlags(W.0 | CommandFlags::DENYOOM.0 | CommandFlags::BULK.0), KeySpec::ONE),
    spec("ZSCORE", Arity::Exact(3), R, KeySpec::ONE),
    spec("ZRANK", Arity::Exact(3), R, KeySpec::ONE),
    spec("ZCARD", Arity::Exact(2), R, KeySpec::ONE),
    spec("ZREM", Arity::AtLeast(3), W, KeySpec::ONE),
    spec("ZRANGE", Arity::AtLeast(4), R, KeySpec::ONE),
    spec("ZREVRANGE", Arity::AtLeast(4), R, KeySpec::ONE),
    spec("ZRANGEBYSCORE", Arity::AtLeast(4), R, KeySpec::ONE),
    spec("DEL", Arity::AtLeast(2), W, KeySpec::ALL_FROM_1),
    spec("EXISTS", Arity::Exact(2), R, KeySpec::ONE),
    spec("EXPIRE", Arity::Exact(3), W, KeySpec::ONE),
    spec("EXPIREAT", Arity::Exact(3), W, KeySpec::ONE),
    spec("TTL", Arity::Exact(2), R, KeySpec::ONE),
    spec("PERSIST", Arity::Exact(2), W, KeySpec::ONE),
    spec("TYPE", Arity::Exact(2), R, KeySpec::ONE),
    spec("RENAME", Arity::Exact(3), CommandFlags(W.0 | CommandFlags::DENYOOM.0), KeySpec { first: 1, last: 2, step: 1 }),
    spec("RENAMENX", Arity::Exact(3), CommandFlags(W.0 | CommandFlags::DENYOOM.0), KeySpec { first: 1, last: 2, step: 1 }),
    spec("SORT", Arity::AtLeast(2), R, KeySpec::ONE),
    spec("PING", Arity::Exact(1), R, KeySpec::NONE),
    spec("SELECT", Arity::Exact(2), R, KeySpec::NONE),
    spec("FLUSHDB", Arity::Exact(1), W, KeySpec::NONE),
];

fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMAND_TABLE.iter().find(|c| c.name == name)
}

fn check_arity(name: &str, argc: usize) -> StoreResult<()> {
    match lookup(name) {
        Some(c) if c.arity.matches(argc) => Ok(()),
        Some(_) => Err(StoreError::WrongArity(name.to_string())),
        None => Err(StoreError::UnknownCommand(name.to_string())),
    }
}

/// Whether `name`'s final inline-dialect token may be a bulk-length escape
/// hatch rather than the value itself (§4.3). Unknown names are never
/// bulk — the parser falls back to plain inline tokenising for them.
pub fn is_bulk_command(name: &[u8]) -> bool {
    let upper = String::from_utf8_lossy(name).to_ascii_uppercase();
    lookup(&upper).map(|c| c.flags.contains(CommandFlags::BULK)).unwrap_or(false)
}

/// Whether `name` is rejected once used memory exceeds `maxmemory` (§4.5
/// step 6, §7 `DenyOom`).
pub fn is_denyoom_command(name: &str) -> bool {
    lookup(name).map(|c| c.flags.contains(CommandFlags::DENYOOM)).unwrap_or(false)
}

pub fn is_write_command(name: &str) -> bool {
    lookup(name).map(|c| c.flags.contains(CommandFlags::WRITE)).unwrap_or(false)
}

/// Extracts the keys a command's argv touches, per its `KeySpec` (used by
/// the swap subsystem to decide whether a command needs a resident value
/// that currently isn't, §4.8 "Command deferral").
pub fn keys_for(name: &str, argv: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let Some(c) = lookup(name) else {
        return Vec::new();
    };
    if c.keys.first == 0 || c.keys.first >= argv.len() {
        return Vec::new();
    }
    let last = if c.keys.last < 0 {
        (argv.len() as isize + c.keys.last) as usize
    } else {
        c.keys.last as usize
    };
    let mut keys = Vec::new();
    let mut i = c.keys.first;
    let step = c.keys.step.max(1);
    while i <= last && i < argv.len() {
        keys.push(argv[i].clone());
        i += step;
    }
    keys
}

fn ends_with_option(argv: &[Vec<u8>], idx: usize, word: &[u8]) -> bool {
    argv.get(idx).map(|a| a.eq_ignore_ascii_case(word)).unwrap_or(false)
}

/// Routes one already-framed request to its handler (§4.5 steps: lookup
/// command, check arity, execute, report whether the keyspace changed).
/// `PING`/`SELECT`/`FLUSHDB` are handled one level up by the connection/
/// server layer since they touch client or store state this function
/// doesn't have access to — anything reaching here by those names is a
/// caller bug, not a client-facing error.
pub fn dispatch(db: &mut Database, argv: &[Vec<u8>], limits: &HashLimits) -> StoreResult<(Reply, bool)> {
    if argv.is_empty() {
        return Err(StoreError::Syntax);
    }
    let name = String::from_utf8_lossy(&argv[0]).to_ascii_uppercase();
    check_arity(&name, argv.len())?;

    macro_rules! read_only {
        ($handler:expr) => {
            $handler(db, argv).map(|r| (r, false))
        };
    }

    match name.as_str() {
        "GET" => read_only!(strings::get),
        "SET" => strings::set(db, argv),
        "SETNX" => strings::setnx(db, argv),
        "GETSET" => strings::getset(db, argv),
        "APPEND" => strings::append(db, argv),
        "STRLEN" => read_only!(strings::strlen),
        "SUBSTR" | "GETRANGE" => read_only!(strings::substr),
        "INCR" => strings::incr(db, argv),
        "DECR" => strings::decr(db, argv),
        "INCRBY" => strings::incrby(db, argv),
        "DECRBY" => strings::decrby(db, argv),
        "MSET" => strings::mset(db, argv),
        "MGET" => read_only!(strings::mget),

        "RPUSH" => lists::rpush(db, argv),
        "LPUSH" => lists::lpush(db, argv),
        "LPOP" => lists::lpop(db, argv),
        "RPOP" => lists::rpop(db, argv),
        "LLEN" => read_only!(lists::llen),
        "LINDEX" => read_only!(lists::lindex),
        "LSET" => lists::lset(db, argv),
        "LRANGE" => read_only!(lists::lrange),
        "LTRIM" => lists::ltrim(db, argv),
        "LREM" => lists::lrem(db, argv),

        "SADD" => sets::sadd(db, argv),
        "SREM" => sets::srem(db, argv),
        "SISMEMBER" => read_only!(sets::sismember),
        "SCARD" => read_only!(sets::scard),
        "SMEMBERS" => read_only!(sets::smembers),
        "SINTER" => read_only!(sets::sinter),
        "SUNION" => read_only!(sets::sunion),
        "SDIFF" => read_only!(sets::sdiff),
        "SPOP" => sets::spop(db, argv),
        "SRANDMEMBER" => read_only!(sets::srandmember),

        "HSET" => hashes::hset(db, argv, limits),
        "HMSET" => hashes::hmset(db, argv, limits),
        "HGET" => read_only!(hashes::hget),
        "HMGET" => read_only!(hashes::hmget),
        "HDEL" => hashes::hdel(db, argv),
        "HEXISTS" => read_only!(hashes::hexists),
        "HLEN" => read_only!(hashes::hlen),
        "HGETALL" => read_only!(hashes::hgetall),
        "HKEYS" => read_only!(hashes::hkeys),
        "HVALS" => read_only!(hashes::hvals),

        "ZADD" => zsets::zadd(db, argv),
        "ZINCRBY" => zsets::zincrby(db, argv),
        "ZSCORE" => read_only!(zsets::zscore),
        "ZRANK" => read_only!(zsets::zrank),
        "ZCARD" => read_only!(zsets::zcard),
        "ZREM" => zsets::zrem(db, argv),
        "ZRANGE" => {
            let withscores = ends_with_option(argv, argv.len() - 1, b"WITHSCORES");
            zsets::zrange(db, argv, withscores).map(|r| (r, false))
        }
        "ZREVRANGE" => {
            let withscores = ends_with_option(argv, argv.len() - 1, b"WITHSCORES");
            zsets::zrevrange(db, argv, withscores).map(|r| (r, false))
        }
        "ZRANGEBYSCORE" => read_only!(zsets::zrangebyscore),

        "DEL" => generic::del(db, argv),
        "EXISTS" => read_only!(generic::exists),
        "EXPIRE" => generic::expire(db, argv),
        "EXPIREAT" => generic::expireat(db, argv),
        "TTL" => read_only!(generic::ttl),
        "PERSIST" => generic::persist(db, argv),
        "TYPE" => read_only!(generic::key_type),
        "RENAME" => generic::rename(db, argv),
        "RENAMENX" => generic::renamenx(db, argv),

        "SORT" => sort::sort(db, argv),

        _ => Err(StoreError::UnknownCommand(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: HashLimits = HashLimits { max_entries: 64, max_value: 512 };

    #[test]
    fn unknown_command_is_rejected_before_touching_the_database() {
        let mut db = Database::new();
        let err = dispatch(&mut db, &[b"BOGUS".to_vec()], &LIMITS).unwrap_err();
        assert!(matches!(err, StoreError::UnknownCommand(_)));
    }

    #[test]
    fn wrong_arity_is_rejected_before_dispatch() {
        let mut db = Database::new();
        let err = dispatch(&mut db, &[b"GET".to_vec()], &LIMITS).unwrap_err();
        assert!(matches!(err, StoreError::WrongArity(_)));
    }

    #[test]
    fn set_then_get_round_trips_through_dispatch() {
        let mut db = Database::new();
        let (_, dirty) = dispatch(&mut db, &[b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()], &LIMITS).unwrap();
        assert!(dirty);
        let (reply, dirty) = dispatch(&mut db, &[b"GET".to_vec(), b"k".to_vec()], &LIMITS).unwrap();
        assert!(!dirty);
        assert!(matches!(reply, Reply::Bulk(Some(_))));
    }

    #[test]
    fn zrange_dispatch_detects_trailing_withscores_flag() {
        let mut db = Database::new();
        dispatch(&mut db, &[b"ZADD".to_vec(), b"z".to_vec(), b"1".to_vec(), b"m".to_vec()], &LIMITS).unwrap();
        let (reply, _) = dispatch(
            &mut db,
            &[b"ZRANGE".to_vec(), b"z".to_vec(), b"0".to_vec(), b"-1".to_vec(), b"WITHSCORES".to_vec()],
            &LIMITS,
        )
        .unwrap();
        let Reply::MultiBulk(Some(items)) = reply else { panic!() };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn bulk_flag_is_set_only_for_single_trailing_value_commands() {
        assert!(is_bulk_command(b"SET"));
        assert!(is_bulk_command(b"set"));
        assert!(is_bulk_command(b"HSET"));
        assert!(!is_bulk_command(b"RPUSH"));
        assert!(!is_bulk_command(b"ZADD"));
        assert!(!is_bulk_command(b"GET"));
    }

    #[test]
    fn denyoom_flag_covers_memory_growing_writes_only() {
        assert!(is_denyoom_command("SET"));
        assert!(is_denyoom_command("RPUSH"));
        assert!(!is_denyoom_command("INCR"));
        assert!(!is_denyoom_command("GET"));
        assert!(!is_denyoom_command("DEL"));
    }

    #[test]
    fn keys_for_extracts_every_key_position() {
        let mset = [b"MSET".to_vec(), b"a".to_vec(), b"1".to_vec(), b"b".to_vec(), b"2".to_vec()];
        assert_eq!(keys_for("MSET", &mset), vec![b"a".to_vec(), b"b".to_vec()]);

        let get = [b"GET".to_vec(), b"k".to_vec()];
        assert_eq!(keys_for("GET", &get), vec![b"k".to_vec()]);

        let rename = [b"RENAME".to_vec(), b"a".to_vec(), b"b".to_vec()];
        assert_eq!(keys_for("RENAME", &rename), vec![b"a".to_vec(), b"b".to_vec()]);

        let ping = [b"PING".to_vec()];
        assert!(keys_for("PING", &ping).is_empty());
    }
}
