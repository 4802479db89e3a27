//! `SORT` (C9, §4.9): scored sort over a list/set/zset with BY/GET/LIMIT/
//! ASC|DESC/ALPHA/STORE options.

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::protocol::Reply;
use crate::value::Value;

struct SortOptions {
    by: Option<Vec<u8>>,
    get: Vec<Vec<u8>>,
    limit: Option<(usize, usize)>,
    desc: bool,
    alpha: bool,
    store: Option<Vec<u8>>,
}

fn parse_options(argv: &[Vec<u8>]) -> StoreResult<SortOptions> {
    let mut opts = SortOptions { by: None, get: Vec::new(), limit: None, desc: false, alpha: false, store: None };
    let mut i = 2;
    while i < argv.len() {
        let tok = String::from_utf8_lossy(&argv[i]).to_ascii_uppercase();
        match tok.as_str() {
            "BY" => {
                opts.by = Some(argv.get(i + 1).ok_or(StoreError::Syntax)?.clone());
                i += 2;
            }
            "GET" => {
                opts.get.push(argv.get(i + 1).ok_or(StoreError::Syntax)?.clone());
                i += 2;
            }
            "LIMIT" => {
                let off: usize = crate::protocol::parse_integer(argv.get(i + 1).ok_or(StoreError::Syntax)?)? as usize;
                let cnt: usize = crate::protocol::parse_integer(argv.get(i + 2).ok_or(StoreError::Syntax)?)? as usize;
                opts.limit = Some((off, cnt));
                i += 3;
            }
            "ASC" => {
                opts.desc = false;
                i += 1;
            }
            "DESC" => {
                opts.desc = true;
                i += 1;
            }
            "ALPHA" => {
                opts.alpha = true;
                i += 1;
            }
            "STORE" => {
                opts.store = Some(argv.get(i + 1).ok_or(StoreError::Syntax)?.clone());
                i += 2;
            }
            _ => return Err(StoreError::Syntax),
        }
    }
    Ok(opts)
}

/// Substitutes the first `*` in `pattern` with `elem` (§4.9 "Pattern
/// substitution takes the first `*` only").
fn substitute(pattern: &[u8], elem: &[u8]) -> Vec<u8> {
    if let Some(pos) = pattern.iter().position(|&b| b == b'*') {
        let mut out = Vec::with_capacity(pattern.len() + elem.len());
        out.extend_from_slice(&pattern[..pos]);
        out.extend_from_slice(elem);
        out.extend_from_slice(&pattern[pos + 1..]);
        out
    } else {
        pattern.to_vec()
    }
}

/// Resolves a `GET`/`BY` pattern against an element: `#` yields the element
/// itself, otherwise it's a key lookup (hash field via `->field` suffix not
/// modeled — plain key lookup only, matching the common case).
fn resolve_pattern(db: &mut Database, pattern: &[u8], elem: &[u8]) -> Option<Vec<u8>> {
    if pattern == b"#" {
        return Some(elem.to_vec());
    }
    let key = substitute(pattern, elem);
    db.lookup(&key).and_then(|v| v.as_str()).map(|s| s.as_bytes())
}

fn source_elements(db: &mut Database, key: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
    match db.lookup(key) {
        None => Ok(Vec::new()),
        Some(v) => match v {
            Value::List(l) => Ok(l.iter().cloned().collect()),
            Value::Set(s) => Ok(s.iter().map(|(k, _)| k.clone()).collect()),
            Value::ZSet(z) => Ok(z.iter_ascending().map(|(m, _)| m.clone()).collect()),
            _ => Err(StoreError::WrongKind),
        },
    }
}

pub fn sort(db: &mut Database, argv: &[Vec<u8>]) -> StoreResult<(Reply, bool)> {
    let opts = parse_options(argv)?;
    let mut elements = source_elements(db, &argv[1])?;

    // BY with no '*' means "no sort" (§4.9).
    let should_sort = opts.by.as_ref().map(|p| p.contains(&b'*')).unwrap_or(true);
    if should_sort {
        let mut keyed: Vec<(Vec<u8>, Vec<u8>)> = elements
            .iter()
            .map(|e| {
                let sort_key = match &opts.by {
                    Some(pattern) => resolve_pattern(db, pattern, e).unwrap_or_default(),
                    None => e.clone(),
                };
                (sort_key, e.clone())
            })
            .collect();
        if opts.alpha {
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
        } else {
            keyed.sort_by(|a, b| {
                let fa: f64 = std::str::from_utf8(&a.0).ok().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                let fb: f64 = std::str::from_utf8(&b.0).ok().and_then(|s| s.parse().ok()).unwrap_or(0.0);
                fa.partial_cmp(&fb).unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        if opts.desc {
            keyed.reverse();
        }
        elements = keyed.into_iter().map(|(_, e)| e).collect();
    }

    if let Some((off, cnt)) = opts.limit {
        elements = elements.into_iter().skip(off).take(cnt).collect();
    }

    let output: Vec<Vec<u8>> = if opts.get.is_empty() {
        elements
    } else {
        let mut out = Vec::new();
        for e in &elements {
            for pattern in &opts.get {
                out.push(resolve_pattern(db, pattern, e).unwrap_or_default());
            }
        }
        out
    };

    if let Some(store_key) = opts.store {
        let mut list = crate::container::DList::new();
        for item in &output {
            list.push(crate::container::End::Tail, item.clone());
        }
        let len = list.len();
        if len == 0 {
            db.remove(&store_key);
        } else {
            db.set(store_key, Value::List(list));
        }
        return Ok((Reply::Integer(len as i64), true));
    }

    Ok((Reply::multibulk(output.into_iter().map(Reply::bulk).collect()), false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::lists::rpush;

    #[test]
    fn numeric_sort_orders_ascending_by_default() {
        let mut db = Database::new();
        rpush(&mut db, &[b"RPUSH".to_vec(), b"l".to_vec(), b"3".to_vec()]).unwrap();
        rpush(&mut db, &[b"RPUSH".to_vec(), b"l".to_vec(), b"1".to_vec()]).unwrap();
        rpush(&mut db, &[b"RPUSH".to_vec(), b"l".to_vec(), b"2".to_vec()]).unwrap();
        let (reply, _) = sort(&mut db, &[b"SORT".to_vec(), b"l".to_vec()]).unwrap();
        let Reply::MultiBulk(Some(items)) = reply else { panic!() };
        let values: Vec<_> = items
            .into_iter()
            .map(|r| match r {
                Reply::Bulk(Some(b)) => b,
                _ => panic!(),
            })
            .collect();
        assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
    }

    #[test]
    fn get_hash_pattern_with_sentinel_yields_element_itself() {
        let mut db = Database::new();
        rpush(&mut db, &[b"RPUSH".to_vec(), b"l".to_vec(), b"a".to_vec()]).unwrap();
        let (reply, _) = sort(&mut db, &[b"SORT".to_vec(), b"l".to_vec(), b"ALPHA".to_vec(), b"GET".to_vec(), b"#".to_vec()]).unwrap();
        let Reply::MultiBulk(Some(items)) = reply else { panic!() };
        assert_eq!(items.len(), 1);
    }
}
