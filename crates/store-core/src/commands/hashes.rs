//! HASH command semantics (§4.9): `HSET` promotes the packed map to a hash
//! table in place, in caller order, before performing the insert.

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::protocol::Reply;
use crate::value::Value;

pub struct HashLimits {
    pub max_entries: usize,
    pub max_value: usize,
}

pub fn hset(db: &mut Database, argv: &[Vec<u8>], limits: &HashLimits) -> StoreResult<(Reply, bool)> {
    if db.lookup(&argv[1]).is_some() && db.lookup(&argv[1]).unwrap().as_hash().is_none() {
        return Err(StoreError::WrongKind);
    }
    if db.lookup(&argv[1]).is_none() {
        db.set(argv[1].clone(), Value::new_hash());
    }
    let hash = db.dict.get_mut(&argv[1]).unwrap().as_hash_mut().unwrap();
    let existed = hash.set(&argv[2], &argv[3], limits.max_entries, limits.max_value);
    Ok((Reply::Integer(!existed as i64), true))
}

pub fn hmset(db: &mut Database, argv: &[Vec<u8>], limits: &HashLimits) -> StoreResult<(Reply, bool)> {
    if argv.len() < 4 || argv.len() % 2 != 0 {
        return Err(StoreError::WrongArity("HMSET".into()));
    }
    if db.lookup(&argv[1]).is_some() && db.lookup(&argv[1]).unwrap().as_hash().is_none() {
        return Err(StoreError::WrongKind);
    }
    if db.lookup(&argv[1]).is_none() {
        db.set(argv[1].clone(), Value::new_hash());
    }
    let hash = db.dict.get_mut(&argv[1]).unwrap().as_hash_mut().unwrap();
    for pair in argv[2..].chunks(2) {
        hash.set(&pair[0], &pair[1], limits.max_entries, limits.max_value);
    }
    Ok((Reply::ok(), true))
}

pub fn hget(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match db.lookup(&argv[1]) {
        Some(v) => {
            let h = v.as_hash().ok_or(StoreError::WrongKind)?;
            match h.get(&argv[2]) {
                Some(bytes) => Ok(Reply::bulk(bytes)),
                None => Ok(Reply::nil_bulk()),
            }
        }
        None => Ok(Reply::nil_bulk()),
    }
}

pub fn hmget(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    let fields = &argv[2..];
    match db.lookup(&argv[1]) {
        Some(v) => {
            let h = v.as_hash().ok_or(StoreError::WrongKind)?;
            Ok(Reply::multibulk(
                fields
                    .iter()
                    .map(|f| match h.get(f) {
                        Some(b) => Reply::bulk(b),
                        None => Reply::nil_bulk(),
                    })
                    .collect(),
            ))
        }
        None => Ok(Reply::multibulk(fields.iter().map(|_| Reply::nil_bulk()).collect())),
    }
}

pub fn hdel(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let Some(value) = db.lookup_mut(&argv[1]) else {
        return Ok((Reply::Integer(0), false));
    };
    let h = value.as_hash_mut().ok_or(StoreError::WrongKind)?;
    let mut removed = 0;
    for field in &argv[2..] {
        if h.remove(field) {
            removed += 1;
        }
    }
    db.delete_if_empty(&argv[1]);
    Ok((Reply::Integer(removed), removed > 0))
}

pub fn hexists(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match db.lookup(&argv[1]) {
        Some(v) => Ok(Reply::Integer(v.as_hash().ok_or(StoreError::WrongKind)?.contains(&argv[2]) as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

pub fn hlen(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match db.lookup(&argv[1]) {
        Some(v) => Ok(Reply::Integer(v.as_hash().ok_or(StoreError::WrongKind)?.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

pub fn hgetall(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match db.lookup(&argv[1]) {
        Some(v) => {
            let h = v.as_hash().ok_or(StoreError::WrongKind)?;
            let mut out = Vec::new();
            for (k, val) in h.iter() {
                out.push(Reply::bulk(k));
                out.push(Reply::bulk(val));
            }
            Ok(Reply::multibulk(out))
        }
        None => Ok(Reply::multibulk(Vec::new())),
    }
}

pub fn hkeys(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match db.lookup(&argv[1]) {
        Some(v) => {
            let h = v.as_hash().ok_or(StoreError::WrongKind)?;
            Ok(Reply::multibulk(h.iter().into_iter().map(|(k, _)| Reply::bulk(k)).collect()))
        }
        None => Ok(Reply::multibulk(Vec::new())),
    }
}

pub fn hvals(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match db.lookup(&argv[1]) {
        Some(v) => {
            let h = v.as_hash().ok_or(StoreError::WrongKind)?;
            Ok(Reply::multibulk(h.iter().into_iter().map(|(_, val)| Reply::bulk(val)).collect()))
        }
        None => Ok(Reply::multibulk(Vec::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: HashLimits = HashLimits { max_entries: 64, max_value: 512 };

    #[test]
    fn hset_promotes_on_oversize_value_and_preserves_bytes() {
        let mut db = Database::new();
        hset(&mut db, &[b"HSET".to_vec(), b"h".to_vec(), b"f1".to_vec(), b"v1".to_vec()], &LIMITS).unwrap();
        let big = vec![b'x'; 513];
        hset(&mut db, &[b"HSET".to_vec(), b"h".to_vec(), b"f1".to_vec(), big.clone()], &LIMITS).unwrap();
        let Reply::Bulk(Some(bytes)) = hget(&mut db, &[b"HGET".to_vec(), b"h".to_vec(), b"f1".to_vec()]).unwrap()
        else {
            panic!()
        };
        assert_eq!(bytes, big);
    }

    #[test]
    fn hgetall_yields_all_field_value_pairs_as_unordered_set() {
        let mut db = Database::new();
        hset(&mut db, &[b"HSET".to_vec(), b"h".to_vec(), b"f1".to_vec(), b"v1".to_vec()], &LIMITS).unwrap();
        hset(&mut db, &[b"HSET".to_vec(), b"h".to_vec(), b"f2".to_vec(), b"v2".to_vec()], &LIMITS).unwrap();
        let Reply::MultiBulk(Some(items)) = hgetall(&mut db, &[b"HGETALL".to_vec(), b"h".to_vec()]).unwrap()
        else {
            panic!()
        };
        assert_eq!(items.len(), 4);
    }
}
