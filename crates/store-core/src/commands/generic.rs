//! Key-space-generic commands (§4.9): TTL management, existence, renaming.

use crate::db::{unix_now, Database};
use crate::error::StoreResult;
use crate::protocol::Reply;

pub fn del(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let mut count = 0;
    for key in &argv[1..] {
        if db.remove(key).is_some() {
            count += 1;
        }
    }
    Ok((Reply::Integer(count), count > 0))
}

pub fn exists(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    Ok(Reply::Integer(db.contains(&argv[1]) as i64))
}

pub fn expire(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let secs: i64 = crate::protocol::parse_integer(&argv[2])?;
    let at = unix_now() + secs;
    if secs <= 0 {
        let existed = db.remove(&argv[1]).is_some();
        return Ok((Reply::Integer(existed as i64), existed));
    }
    let ok = db.set_expire(&argv[1], at);
    Ok((Reply::Integer(ok as i64), ok))
}

pub fn expireat(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let at: i64 = crate::protocol::parse_integer(&argv[2])?;
    if at <= unix_now() {
        let existed = db.remove(&argv[1]).is_some();
        return Ok((Reply::Integer(existed as i64), existed));
    }
    let ok = db.set_expire(&argv[1], at);
    Ok((Reply::Integer(ok as i64), ok))
}

pub fn ttl(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    if !db.contains(&argv[1]) {
        return Ok(Reply::Integer(-1));
    }
    Ok(Reply::Integer(db.ttl(&argv[1]).unwrap_or(-1)))
}

pub fn persist(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let ok = db.persist(&argv[1]);
    Ok((Reply::Integer(ok as i64), ok))
}

pub fn key_type(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match db.lookup(&argv[1]) {
        Some(v) => Ok(Reply::Status(v.value_type().name().to_string())),
        None => Ok(Reply::Status("none".to_string())),
    }
}

pub fn rename(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    use crate::error::StoreError;
    let Some(value) = db.remove(&argv[1]) else {
        return Err(StoreError::NoSuchKey);
    };
    let expiry = db.ttl(&argv[1]);
    db.set(argv[2].clone(), value);
    if let Some(ttl) = expiry {
        db.set_expire(&argv[2], unix_now() + ttl);
    }
    Ok((Reply::ok(), true))
}

pub fn renamenx(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    use crate::error::StoreError;
    if db.contains(&argv[2]) {
        return Ok((Reply::Integer(0), false));
    }
    let Some(value) = db.remove(&argv[1]) else {
        return Err(StoreError::NoSuchKey);
    };
    db.set(argv[2].clone(), value);
    Ok((Reply::Integer(1), true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{StrValue, Value};

    #[test]
    fn expire_zero_removes_key_immediately() {
        let mut db = Database::new();
        db.set(b"k".to_vec(), Value::Str(StrValue::from_bytes(b"v".to_vec())));
        let (reply, dirty) = expire(&mut db, &[b"EXPIRE".to_vec(), b"k".to_vec(), b"0".to_vec()]).unwrap();
        assert!(matches!(reply, Reply::Integer(1)));
        assert!(dirty);
        assert!(!db.contains(b"k"));
    }

    #[test]
    fn ttl_on_missing_key_is_negative_one() {
        let mut db = Database::new();
        let Reply::Integer(t) = ttl(&mut db, &[b"TTL".to_vec(), b"nope".to_vec()]).unwrap() else {
            panic!()
        };
        assert_eq!(t, -1);
    }
}
