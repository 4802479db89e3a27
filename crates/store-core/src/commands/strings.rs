//! STRING command semantics (§4.9).

use crate::container::sds;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::protocol::Reply;
use crate::value::{StrValue, Value};

fn get_str<'a>(db: &'a mut Database, key: &[u8]) -> StoreResult<Option<&'a StrValue>> {
    match db.lookup(key) {
        Some(v) => v.as_str().map(Some).ok_or(StoreError::WrongKind),
        None => Ok(None),
    }
}

pub fn get(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match get_str(db, &argv[1])? {
        Some(s) => Ok(Reply::bulk(s.as_bytes())),
        None => Ok(Reply::nil_bulk()),
    }
}

pub fn set(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    db.set(argv[1].clone(), Value::Str(StrValue::from_bytes(argv[2].clone())));
    Ok((Reply::ok(), true))
}

pub fn setnx(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    if db.contains(&argv[1]) {
        Ok((Reply::Integer(0), false))
    } else {
        db.set(argv[1].clone(), Value::Str(StrValue::from_bytes(argv[2].clone())));
        Ok((Reply::Integer(1), true))
    }
}

pub fn getset(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let prev = match get_str(db, &argv[1])? {
        Some(s) => Reply::bulk(s.as_bytes()),
        None => Reply::nil_bulk(),
    };
    db.set(argv[1].clone(), Value::Str(StrValue::from_bytes(argv[2].clone())));
    Ok((prev, true))
}

/// `APPEND`: if the value is INT-encoded, it must be decoded to raw bytes
/// first (it is conceptually copy-on-write shared with callers that read
/// it) before appending (§4.9).
pub fn append(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let key = &argv[1];
    let new_len = match db.lookup_mut(key) {
        Some(v) => {
            let s = v.as_str_mut().ok_or(StoreError::WrongKind)?;
            let mut bytes = s.as_bytes();
            bytes.extend_from_slice(&argv[2]);
            let len = bytes.len();
            *s = StrValue::Raw(bytes);
            len
        }
        None => {
            db.set(key.clone(), Value::Str(StrValue::from_bytes(argv[2].clone())));
            argv[2].len()
        }
    };
    Ok((Reply::Integer(new_len as i64), true))
}

pub fn strlen(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match get_str(db, &argv[1])? {
        Some(s) => Ok(Reply::Integer(s.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

/// `SUBSTR`/`GETRANGE`: both indices inclusive, negative-aware; an invalid
/// range is a null bulk, not an error (§4.9).
pub fn substr(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    let start: i64 = crate::protocol::parse_integer(&argv[2])?;
    let end: i64 = crate::protocol::parse_integer(&argv[3])?;
    match get_str(db, &argv[1])? {
        Some(s) => {
            let bytes = s.as_bytes();
            Ok(Reply::bulk(sds::substr(&bytes, start, end).to_vec()))
        }
        None => Ok(Reply::nil_bulk()),
    }
}

fn decoded_int(v: &Value) -> StoreResult<i64> {
    let s = v.as_str().ok_or(StoreError::WrongKind)?;
    match s {
        StrValue::Int(n) => Ok(*n),
        StrValue::Raw(b) => sds::parse_i64_strict(b).ok_or(StoreError::NotAnInteger),
    }
}

fn incr_by(db: &mut Database, key: &[u8], delta: i64) -> StoreResult<(Reply, bool)> {
    let current = match db.lookup(key) {
        Some(v) => decoded_int(v)?,
        None => 0,
    };
    let next = current.checked_add(delta).ok_or(StoreError::NotAnInteger)?;
    db.set(key.to_vec(), Value::Str(StrValue::Int(next)));
    Ok((Reply::Integer(next), true))
}

pub fn incr(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    incr_by(db, &argv[1], 1)
}

pub fn decr(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    incr_by(db, &argv[1], -1)
}

pub fn incrby(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let delta = crate::protocol::parse_integer(&argv[2])?;
    incr_by(db, &argv[1], delta)
}

pub fn decrby(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let delta = crate::protocol::parse_integer(&argv[2])?;
    incr_by(db, &argv[1], -delta)
}

pub fn mset(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    if argv.len() < 3 || argv.len() % 2 != 1 {
        return Err(StoreError::WrongArity("MSET".into()));
    }
    for pair in argv[1..].chunks(2) {
        db.set(pair[0].clone(), Value::Str(StrValue::from_bytes(pair[1].clone())));
    }
    Ok((Reply::ok(), true))
}

pub fn mget(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    let mut out = Vec::with_capacity(argv.len() - 1);
    for key in &argv[1..] {
        let item = match db.lookup(key) {
            Some(v) => match v.as_str() {
                Some(s) => Reply::bulk(s.as_bytes()),
                None => Reply::nil_bulk(),
            },
            None => Reply::nil_bulk(),
        };
        out.push(item);
    }
    Ok(Reply::multibulk(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_decodes_int_encoding_before_appending() {
        let mut db = Database::new();
        set(&mut db, &[b"SET".to_vec(), b"k".to_vec(), b"2147483647".to_vec()]).unwrap();
        let (reply, _) = append(&mut db, &[b"APPEND".to_vec(), b"k".to_vec(), b"0".to_vec()]).unwrap();
        assert!(matches!(reply, Reply::Integer(11)));
        let Reply::Bulk(Some(bytes)) = get(&mut db, &[b"GET".to_vec(), b"k".to_vec()]).unwrap() else {
            panic!()
        };
        assert_eq!(bytes, b"21474836470");
    }

    #[test]
    fn incr_on_non_numeric_string_fails_without_mutating() {
        let mut db = Database::new();
        set(&mut db, &[b"SET".to_vec(), b"k".to_vec(), b"abc".to_vec()]).unwrap();
        assert!(incr(&mut db, &[b"INCR".to_vec(), b"k".to_vec()]).is_err());
        let Reply::Bulk(Some(bytes)) = get(&mut db, &[b"GET".to_vec(), b"k".to_vec()]).unwrap() else {
            panic!()
        };
        assert_eq!(bytes, b"abc");
    }

    #[test]
    fn substr_negative_range_and_out_of_bounds() {
        let mut db = Database::new();
        set(&mut db, &[b"SET".to_vec(), b"k".to_vec(), b"Hello World".to_vec()]).unwrap();
        let Reply::Bulk(Some(full)) =
            substr(&mut db, &[b"SUBSTR".to_vec(), b"k".to_vec(), b"0".to_vec(), b"-1".to_vec()]).unwrap()
        else {
            panic!()
        };
        assert_eq!(full, b"Hello World");
    }
}
