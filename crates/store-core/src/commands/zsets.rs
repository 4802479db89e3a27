//! ZSET command semantics (§4.9, §4.10).

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::protocol::{parse_float, Reply};
use crate::value::Value;

pub fn zadd(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    if argv.len() < 4 || argv.len() % 2 != 0 {
        return Err(StoreError::WrongArity("ZADD".into()));
    }
    if db.lookup(&argv[1]).is_some() && db.lookup(&argv[1]).unwrap().as_zset().is_none() {
        return Err(StoreError::WrongKind);
    }
    if db.lookup(&argv[1]).is_none() {
        db.set(argv[1].clone(), Value::new_zset());
    }
    let zset = db.dict.get_mut(&argv[1]).unwrap().as_zset_mut().unwrap();
    let mut added = 0;
    for pair in argv[2..].chunks(2) {
        let score = parse_float(&pair[0])?;
        if zset.insert(pair[1].clone(), score) {
            added += 1;
        }
    }
    Ok((Reply::Integer(added), true))
}

pub fn zincrby(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let delta = parse_float(&argv[2])?;
    if db.lookup(&argv[1]).is_some() && db.lookup(&argv[1]).unwrap().as_zset().is_none() {
        return Err(StoreError::WrongKind);
    }
    if db.lookup(&argv[1]).is_none() {
        db.set(argv[1].clone(), Value::new_zset());
    }
    let zset = db.dict.get_mut(&argv[1]).unwrap().as_zset_mut().unwrap();
    let current = zset.score(&argv[3]).unwrap_or(0.0);
    let new_score = current + delta;
    zset.insert(argv[3].clone(), new_score);
    Ok((Reply::bulk(format_score(new_score).into_bytes()), true))
}

pub fn zscore(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match db.lookup(&argv[1]) {
        Some(v) => {
            let z = v.as_zset().ok_or(StoreError::WrongKind)?;
            match z.score(&argv[2]) {
                Some(s) => Ok(Reply::bulk(format_score(s).into_bytes())),
                None => Ok(Reply::nil_bulk()),
            }
        }
        None => Ok(Reply::nil_bulk()),
    }
}

pub fn zrank(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match db.lookup(&argv[1]) {
        Some(v) => {
            let z = v.as_zset().ok_or(StoreError::WrongKind)?;
            match z.rank(&argv[2]) {
                Some(r) => Ok(Reply::Integer(r as i64)),
                None => Ok(Reply::nil_bulk()),
            }
        }
        None => Ok(Reply::nil_bulk()),
    }
}

pub fn zcard(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    match db.lookup(&argv[1]) {
        Some(v) => Ok(Reply::Integer(v.as_zset().ok_or(StoreError::WrongKind)?.len() as i64)),
        None => Ok(Reply::Integer(0)),
    }
}

pub fn zrem(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let Some(value) = db.lookup_mut(&argv[1]) else {
        return Ok((Reply::Integer(0), false));
    };
    let z = value.as_zset_mut().ok_or(StoreError::WrongKind)?;
    let mut removed = 0;
    for member in &argv[2..] {
        if z.remove(member) {
            removed += 1;
        }
    }
    db.delete_if_empty(&argv[1]);
    Ok((Reply::Integer(removed), removed > 0))
}

/// Renders scores the way the snapshot codec and wire protocol both do
/// (§4.6 "Double", S4 "%.17g"-style) — `%g`-like trimming of trailing
/// zeros, falling back to the full precision representation.
pub fn format_score(score: f64) -> String {
    if score == score.trunc() && score.abs() < 1e17 {
        format!("{}", score as i64)
    } else {
        format!("{score}")
    }
}

pub fn zrange(db: &mut Database, argv: &[Vec<u8>], withscores: bool) -> StoreResult<Reply> {
    let start: i64 = crate::protocol::parse_integer(&argv[2])?;
    let stop: i64 = crate::protocol::parse_integer(&argv[3])?;
    let Some(value) = db.lookup(&argv[1]) else {
        return Ok(Reply::multibulk(Vec::new()));
    };
    let z = value.as_zset().ok_or(StoreError::WrongKind)?;
    let items = z.range_by_rank(start, stop);
    Ok(render_pairs(items, withscores))
}

pub fn zrevrange(db: &mut Database, argv: &[Vec<u8>], withscores: bool) -> StoreResult<Reply> {
    let start: i64 = crate::protocol::parse_integer(&argv[2])?;
    let stop: i64 = crate::protocol::parse_integer(&argv[3])?;
    let Some(value) = db.lookup(&argv[1]) else {
        return Ok(Reply::multibulk(Vec::new()));
    };
    let z = value.as_zset().ok_or(StoreError::WrongKind)?;
    let mut items = z.range_by_rank(start, stop);
    items.reverse();
    Ok(render_pairs(items, withscores))
}

fn render_pairs(items: Vec<(Vec<u8>, f64)>, withscores: bool) -> Reply {
    let mut out = Vec::new();
    for (member, score) in items {
        out.push(Reply::bulk(member));
        if withscores {
            out.push(Reply::bulk(format_score(score).into_bytes()));
        }
    }
    Reply::multibulk(out)
}

/// Parses a `ZRANGEBYSCORE` endpoint: a leading `(` means strict inequality
/// (§4.9 "endpoints support (x prefix for strict inequality").
fn parse_score_endpoint(tok: &[u8]) -> StoreResult<(f64, bool)> {
    if tok.first() == Some(&b'(') {
        Ok((parse_float(&tok[1..])?, true))
    } else {
        Ok((parse_float(tok)?, false))
    }
}

pub fn zrangebyscore(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<Reply> {
    let (min, min_excl) = parse_score_endpoint(&argv[2])?;
    let (max, max_excl) = parse_score_endpoint(&argv[3])?;
    let mut withscores = false;
    let mut limit: Option<(usize, usize)> = None;
    let mut i = 4;
    while i < argv.len() {
        let tok = String::from_utf8_lossy(&argv[i]).to_ascii_uppercase();
        match tok.as_str() {
            "WITHSCORES" => {
                withscores = true;
                i += 1;
            }
            "LIMIT" => {
                if i + 2 >= argv.len() {
                    return Err(StoreError::Syntax);
                }
                let off: usize = crate::protocol::parse_integer(&argv[i + 1])? as usize;
                let cnt: usize = crate::protocol::parse_integer(&argv[i + 2])? as usize;
                limit = Some((off, cnt));
                i += 3;
            }
            _ => return Err(StoreError::Syntax),
        }
    }
    let Some(value) = db.lookup(&argv[1]) else {
        return Ok(Reply::multibulk(Vec::new()));
    };
    let z = value.as_zset().ok_or(StoreError::WrongKind)?;
    let mut items = z.range_by_score(min, min_excl, max, max_excl);
    if let Some((off, cnt)) = limit {
        items = items.into_iter().skip(off).take(cnt).collect();
    }
    Ok(render_pairs(items, withscores))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zadd_reinserts_existing_member_under_new_score() {
        let mut db = Database::new();
        zadd(&mut db, &[b"ZADD".to_vec(), b"z".to_vec(), b"1".to_vec(), b"x".to_vec()]).unwrap();
        zadd(&mut db, &[b"ZADD".to_vec(), b"z".to_vec(), b"5".to_vec(), b"x".to_vec()]).unwrap();
        let Reply::Bulk(Some(score)) = zscore(&mut db, &[b"ZSCORE".to_vec(), b"z".to_vec(), b"x".to_vec()]).unwrap()
        else {
            panic!()
        };
        assert_eq!(score, b"5");
    }

    #[test]
    fn zrange_withscores_matches_scenario_s4() {
        let mut db = Database::new();
        zadd(&mut db, &[b"ZADD".to_vec(), b"z".to_vec(), b"1".to_vec(), b"x".to_vec()]).unwrap();
        zadd(&mut db, &[b"ZADD".to_vec(), b"z".to_vec(), b"2".to_vec(), b"y".to_vec()]).unwrap();
        zadd(&mut db, &[b"ZADD".to_vec(), b"z".to_vec(), b"1.5".to_vec(), b"w".to_vec()]).unwrap();
        let Reply::MultiBulk(Some(items)) =
            zrange(&mut db, &[b"ZRANGE".to_vec(), b"z".to_vec(), b"0".to_vec(), b"-1".to_vec()], true).unwrap()
        else {
            panic!()
        };
        assert_eq!(items.len(), 6);
    }
}
