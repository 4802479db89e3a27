//! SET command semantics (§4.9).

use crate::container::Dict;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::protocol::Reply;
use crate::value::Value;

pub fn sadd(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    if db.lookup(&argv[1]).is_some() && db.lookup(&argv[1]).unwrap().as_set().is_none() {
        return Err(StoreError::WrongKind);
    }
    if db.lookup(&argv[1]).is_none() {
        db.set(argv[1].clone(), Value::new_set());
    }
    let set = db.dict.get_mut(&argv[1]).unwrap().as_set_mut().unwrap();
    let mut added = 0;
    for member in &argv[2..] {
        if set.insert(member.clone(), ()).is_none() {
            added += 1;
        }
    }
    Ok((Reply::Integer(added), added > 0))
}

pub fn srem(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let Some(value) = db.lookup_mut(&argv[1]) else {
        return Ok((Reply::Integer(0), false));
    };
    let set = value.as_set_mut().ok_or(StoreError::WrongKind)?;
    let mut removed = 0;
    for member in &argv[2..] {
        if set.remove(member.as_slice()).is_some() {
            removed += 1;
        }
    }
    db.delete_if_empty(&argv[1]);
    Ok((Reply::Integer(removed), removed > 0))
}

pub fn sismember(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match db.lookup(&argv[1]) {
        Some(v) => {
            let set = v.as_set().ok_or(StoreError::WrongKind)?;
            Ok(Reply::Integer(set.contains_key(argv[2].as_slice()) as i64))
        }
        None => Ok(Reply::Integer(0)),
    }
}

pub fn scard(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match db.lookup(&argv[1]) {
        Some(v) => Ok(Reply::Integer(v.as_set().ok_or(StoreError::WrongKind)?.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

pub fn smembers(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match db.lookup(&argv[1]) {
        Some(v) => {
            let set = v.as_set().ok_or(StoreError::WrongKind)?;
            Ok(Reply::multibulk(set.iter().map(|(k, _)| Reply::bulk(k.clone())).collect()))
        }
        None => Ok(Reply::multibulk(Vec::new())),
    }
}

fn load_set<'a>(db: &'a mut Database, key: &[u8]) -> StoreResult<Option<&'a Dict<Vec<u8>, ()>>> {
    match db.lookup(key) {
        Some(v) => v.as_set().map(Some).ok_or(StoreError::WrongKind),
        None => Ok(None),
    }
}

pub fn sinter(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    let mut sets = Vec::new();
    for key in &argv[1..] {
        match load_set(db, key)? {
            Some(s) => sets.push(s.iter().map(|(k, _)| k.clone()).collect::<std::collections::HashSet<_>>()),
            None => return Ok(Reply::multibulk(Vec::new())),
        }
    }
    let mut result = sets[0].clone();
    for s in &sets[1..] {
        result.retain(|m| s.contains(m));
    }
    Ok(Reply::multibulk(result.into_iter().map(Reply::bulk).collect()))
}

pub fn sunion(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    let mut result = std::collections::HashSet::new();
    for key in &argv[1..] {
        if let Some(s) = load_set(db, key)? {
            for (m, _) in s.iter() {
                result.insert(m.clone());
            }
        }
    }
    Ok(Reply::multibulk(result.into_iter().map(Reply::bulk).collect()))
}

pub fn sdiff(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    let Some(first) = load_set(db, &argv[1])? else {
        return Ok(Reply::multibulk(Vec::new()));
    };
    let mut result: std::collections::HashSet<Vec<u8>> = first.iter().map(|(k, _)| k.clone()).collect();
    for key in &argv[2..] {
        if let Some(s) = load_set(db, key)? {
            for (m, _) in s.iter() {
                result.remove(m);
            }
        }
    }
    Ok(Reply::multibulk(result.into_iter().map(Reply::bulk).collect()))
}

pub fn spop(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let Some(value) = db.lookup_mut(&argv[1]) else {
        return Ok((Reply::nil_bulk(), false));
    };
    let set = value.as_set_mut().ok_or(StoreError::WrongKind)?;
    let Some(member) = set.keys().next().cloned() else {
        return Ok((Reply::nil_bulk(), false));
    };
    set.remove(member.as_slice());
    db.delete_if_empty(&argv[1]);
    Ok((Reply::bulk(member), true))
}

pub fn srandmember(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match db.lookup(&argv[1]) {
        Some(v) => {
            let set = v.as_set().ok_or(StoreError::WrongKind)?;
            match set.keys().next() {
                Some(m) => Ok(Reply::bulk(m.clone())),
                None => Ok(Reply::nil_bulk()),
            }
        }
        None => Ok(Reply::nil_bulk()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sadd_is_idempotent_on_duplicate_members() {
        let mut db = Database::new();
        sadd(&mut db, &[b"SADD".to_vec(), b"s".to_vec(), b"a".to_vec()]).unwrap();
        let (reply, dirty) = sadd(&mut db, &[b"SADD".to_vec(), b"s".to_vec(), b"a".to_vec()]).unwrap();
        assert!(matches!(reply, Reply::Integer(0)));
        assert!(!dirty);
    }

    #[test]
    fn sinter_returns_common_members_only() {
        let mut db = Database::new();
        sadd(&mut db, &[b"SADD".to_vec(), b"a".to_vec(), b"x".to_vec(), b"y".to_vec()]).unwrap();
        sadd(&mut db, &[b"SADD".to_vec(), b"b".to_vec(), b"y".to_vec(), b"z".to_vec()]).unwrap();
        let Reply::MultiBulk(Some(items)) =
            sinter(&mut db, &[b"SINTER".to_vec(), b"a".to_vec(), b"b".to_vec()]).unwrap()
        else {
            panic!()
        };
        assert_eq!(items.len(), 1);
    }
}
