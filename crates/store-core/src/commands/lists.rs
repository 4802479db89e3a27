//! LIST command semantics (§4.9).

use crate::container::End;
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::protocol::Reply;
use crate::value::Value;

fn push(db: &mut Database, key: &[u8], elems: &[Vec<u8>], end: End) -> StoreResult<(Reply, bool)> {
    if db.lookup(key).is_some() && db.lookup(key).unwrap().as_list().is_none() {
        return Err(StoreError::WrongKind);
    }
    if db.lookup(key).is_none() {
        db.set(key.to_vec(), Value::new_list());
    }
    let list = db.dict.get_mut(key).unwrap().as_list_mut().unwrap();
    for elem in elems {
        match end {
            End::Head => list.push(End::Head, elem.clone()),
            End::Tail => list.push(End::Tail, elem.clone()),
        }
    }
    let len = list.len();
    Ok((Reply::Integer(len as i64), true))
}

pub fn rpush(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    push(db, &argv[1], &argv[2..], End::Tail)
}

pub fn lpush(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    push(db, &argv[1], &argv[2..], End::Head)
}

fn pop(db: &mut Database, key: &[u8], end: End) -> StoreResult<(Reply, bool)> {
    let Some(value) = db.lookup_mut(key) else {
        return Ok((Reply::nil_bulk(), false));
    };
    let list = value.as_list_mut().ok_or(StoreError::WrongKind)?;
    let popped = list.pop(end);
    db.delete_if_empty(key);
    match popped {
        Some(bytes) => Ok((Reply::bulk(bytes), true)),
        None => Ok((Reply::nil_bulk(), false)),
    }
}

pub fn lpop(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    pop(db, &argv[1], End::Head)
}

pub fn rpop(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    pop(db, &argv[1], End::Tail)
}

pub fn llen(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match db.lookup(&argv[1]) {
        Some(v) => Ok(Reply::Integer(v.as_list().ok_or(StoreError::WrongKind)?.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

pub fn lindex(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    let idx: i64 = crate::protocol::parse_integer(&argv[2])?;
    match db.lookup(&argv[1]) {
        Some(v) => {
            let list = v.as_list().ok_or(StoreError::WrongKind)?;
            match list.get(idx) {
                Some(bytes) => Ok(Reply::bulk(bytes.clone())),
                None => Ok(Reply::nil_bulk()),
            }
        }
        None => Ok(Reply::nil_bulk()),
    }
}

pub fn lset(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let idx: i64 = crate::protocol::parse_integer(&argv[2])?;
    let value = db.lookup_mut(&argv[1]).ok_or(StoreError::NoSuchKey)?;
    let list = value.as_list_mut().ok_or(StoreError::WrongKind)?;
    list.set(idx, argv[3].clone()).map_err(|_| StoreError::IndexOutOfRange)?;
    Ok((Reply::ok(), true))
}

pub fn lrange(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    let start: i64 = crate::protocol::parse_integer(&argv[2])?;
    let stop: i64 = crate::protocol::parse_integer(&argv[3])?;
    let Some(value) = db.lookup(&argv[1]) else {
        return Ok(Reply::multibulk(Vec::new()));
    };
    let list = value.as_list().ok_or(StoreError::WrongKind)?;
    let len = list.len() as i64;
    if len == 0 {
        return Ok(Reply::multibulk(Vec::new()));
    }
    let norm = |i: i64| -> i64 { if i < 0 { (len + i).max(0) } else { i } };
    let s = norm(start).max(0);
    let e = norm(stop).min(len - 1);
    if s > e || s >= len {
        return Ok(Reply::multibulk(Vec::new()));
    }
    let items: Vec<Reply> = list
        .iter()
        .skip(s as usize)
        .take((e - s + 1) as usize)
        .map(|v| Reply::bulk(v.clone()))
        .collect();
    Ok(Reply::multibulk(items))
}

pub fn ltrim(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let start: i64 = crate::protocol::parse_integer(&argv[2])?;
    let stop: i64 = crate::protocol::parse_integer(&argv[3])?;
    let Some(value) = db.lookup_mut(&argv[1]) else {
        return Ok((Reply::ok(), false));
    };
    let list = value.as_list_mut().ok_or(StoreError::WrongKind)?;
    let len = list.len() as i64;
    let norm = |i: i64| -> i64 { if i < 0 { (len + i).max(0) } else { i } };
    let s = norm(start).max(0);
    let e = norm(stop).min(len - 1);
    let kept: Vec<Vec<u8>> = if s > e || len == 0 {
        Vec::new()
    } else {
        list.iter().skip(s as usize).take((e - s + 1) as usize).cloned().collect()
    };
    *list = kept.into_iter().collect();
    db.delete_if_empty(&argv[1]);
    Ok((Reply::ok(), true))
}

pub fn lrem(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let count: i64 = crate::protocol::parse_integer(&argv[2])?;
    let target = &argv[3];
    let Some(value) = db.lookup_mut(&argv[1]) else {
        return Ok((Reply::Integer(0), false));
    };
    let list = value.as_list_mut().ok_or(StoreError::WrongKind)?;
    let removed = list.remove_matching(count, |v| v == target);
    db.delete_if_empty(&argv[1]);
    Ok((Reply::Integer(removed as i64), removed > 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpush_then_lrange_preserves_order() {
        let mut db = Database::new();
        rpush(&mut db, &[b"RPUSH".to_vec(), b"l".to_vec(), b"a".to_vec()]).unwrap();
        rpush(&mut db, &[b"RPUSH".to_vec(), b"l".to_vec(), b"b".to_vec()]).unwrap();
        rpush(&mut db, &[b"RPUSH".to_vec(), b"l".to_vec(), b"c".to_vec()]).unwrap();
        let Reply::MultiBulk(Some(items)) =
            lrange(&mut db, &[b"LRANGE".to_vec(), b"l".to_vec(), b"0".to_vec(), b"-1".to_vec()]).unwrap()
        else {
            panic!()
        };
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn popping_last_element_deletes_the_key() {
        let mut db = Database::new();
        rpush(&mut db, &[b"RPUSH".to_vec(), b"l".to_vec(), b"only".to_vec()]).unwrap();
        pop(&mut db, b"l", End::Tail).unwrap();
        assert!(db.dict.get(b"l".as_slice()).is_none());
    }
}
