//! The polymorphic value object (§3): a tagged variant over the five data
//! types, each carrying its own current encoding. Redis's C struct uses a
//! refcounted `void*` payload and an explicit `encoding` byte; here the
//! encoding lives inside the variant itself so illegal combinations (e.g. a
//! LIST claiming `INT` encoding) are unrepresentable.

use crate::container::{DList, Dict, End, PackedMap, SkipList};

pub const DEFAULT_HASH_MAX_ENTRIES: usize = 64;
pub const DEFAULT_HASH_MAX_VALUE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    List,
    Set,
    ZSet,
    Hash,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::List => "list",
            ValueType::Set => "set",
            ValueType::ZSet => "zset",
            ValueType::Hash => "hash",
        }
    }
}

/// STRING encoding: either a raw byte buffer, or a machine integer decoded
/// on demand (§3 "the pointer slot holds a machine-word integer directly").
#[derive(Debug, Clone)]
pub enum StrValue {
    Raw(Vec<u8>),
    Int(i64),
}

impl StrValue {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        if bytes.len() <= 20 {
            if let Some(n) = crate::container::sds::parse_i64_strict(&bytes) {
                return StrValue::Int(n);
            }
        }
        StrValue::Raw(bytes)
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            StrValue::Raw(b) => b.clone(),
            StrValue::Int(n) => n.to_string().into_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StrValue::Raw(b) => b.len(),
            StrValue::Int(n) => n.to_string().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_int(&self) -> bool {
        matches!(self, StrValue::Int(_))
    }
}

/// HASH encoding: packed map below the promotion threshold, plain chained
/// table past it. Promotion is one-way (§3, §4.9).
#[derive(Debug, Clone)]
pub enum HashValue {
    Packed(PackedMap),
    Table(Dict<Vec<u8>, Vec<u8>>),
}

impl HashValue {
    pub fn new() -> Self {
        HashValue::Packed(PackedMap::new())
    }

    pub fn len(&self) -> usize {
        match self {
            HashValue::Packed(m) => m.len(),
            HashValue::Table(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, field: &[u8]) -> Option<Vec<u8>> {
        match self {
            HashValue::Packed(m) => m.get(field).map(|v| v.to_vec()),
            HashValue::Table(d) => d.get(field).cloned(),
        }
    }

    pub fn contains(&self, field: &[u8]) -> bool {
        match self {
            HashValue::Packed(m) => m.contains_key(field),
            HashValue::Table(d) => d.contains_key(field),
        }
    }

    /// Inserts `field` -> `value`, promoting to a hash table first if this
    /// insertion would cross either threshold. Returns `true` if `field`
    /// already existed.
    pub fn set(&mut self, field: &[u8], value: &[u8], max_entries: usize, max_value: usize) -> bool {
        if let HashValue::Packed(m) = self {
            let would_exceed_entries = !m.contains_key(field) && m.len() + 1 > max_entries;
            let would_exceed_value = field.len() > max_value || value.len() > max_value;
            if would_exceed_entries || would_exceed_value {
                self.promote();
            }
        }
        match self {
            HashValue::Packed(m) => m.set(field, value),
            HashValue::Table(d) => d.insert(field.to_vec(), value.to_vec()).is_some(),
        }
    }

    pub fn remove(&mut self, field: &[u8]) -> bool {
        match self {
            HashValue::Packed(m) => m.remove(field),
            HashValue::Table(d) => d.remove(field).is_some(),
        }
    }

    fn promote(&mut self) {
        if let HashValue::Packed(m) = self {
            let table: Dict<Vec<u8>, Vec<u8>> = m
                .iter()
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .collect();
            *self = HashValue::Table(table);
        }
    }

    pub fn iter(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        match self {
            HashValue::Packed(m) => m.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect(),
            HashValue::Table(d) => d.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    pub fn is_packed(&self) -> bool {
        matches!(self, HashValue::Packed(_))
    }
}

impl Default for HashValue {
    fn default() -> Self {
        Self::new()
    }
}

/// ZSET: dual index — a hash table for O(1) score lookup by member and a
/// skip list for ordered traversal/ranking (§3, §4.10). NaN scores are
/// excluded per spec; callers must reject them before calling `insert`.
#[derive(Debug, Clone)]
pub struct ZSetValue {
    scores: Dict<Vec<u8>, f64>,
    order: SkipList<Vec<u8>>,
}

impl ZSetValue {
    pub fn new() -> Self {
        Self {
            scores: Dict::new(),
            order: SkipList::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Inserts/updates `member`'s score, re-linking it in the ordered index
    /// under the new score (§4.9 "on existing member, re-insert ... under
    /// new score"). Returns `true` if `member` is new.
    pub fn insert(&mut self, member: Vec<u8>, score: f64) -> bool {
        let is_new = match self.scores.get(&member) {
            Some(&old_score) => {
                self.order.remove(old_score, &member);
                false
            }
            None => true,
        };
        self.order.insert(score, member.clone());
        self.scores.insert(member, score);
        is_new
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.order.remove(score, &member.to_vec());
                true
            }
            None => false,
        }
    }

    pub fn rank(&self, member: &[u8]) -> Option<u64> {
        let score = self.score(member)?;
        self.order.rank(score, &member.to_vec())
    }

    pub fn iter_ascending(&self) -> impl Iterator<Item = (&Vec<u8>, f64)> {
        self.order.iter()
    }

    pub fn iter_descending(&self) -> impl Iterator<Item = (&Vec<u8>, f64)> {
        self.order.iter_rev()
    }

    pub fn range_by_rank(&self, start: i64, stop: i64) -> Vec<(Vec<u8>, f64)> {
        let len = self.len() as i64;
        if len == 0 {
            return Vec::new();
        }
        let norm = |i: i64| -> i64 { if i < 0 { (len + i).max(0) } else { i } };
        let s = norm(start).max(0);
        let e = norm(stop).min(len - 1);
        if s > e || s >= len {
            return Vec::new();
        }
        self.order
            .range_by_rank(s as u64, e as u64)
            .into_iter()
            .map(|(m, sc)| (m.clone(), sc))
            .collect()
    }

    pub fn range_by_score(
        &self,
        min: f64,
        min_exclusive: bool,
        max: f64,
        max_exclusive: bool,
    ) -> Vec<(Vec<u8>, f64)> {
        self.order
            .range_by_score(min, min_exclusive, max, max_exclusive)
            .into_iter()
            .map(|(m, sc)| (m.clone(), sc))
            .collect()
    }
}

impl Default for ZSetValue {
    fn default() -> Self {
        Self::new()
    }
}

/// The value object: one of the five data types, each in its current
/// encoding. Swap metadata (storage state, page list, last-access time) is
/// *not* part of this type — it lives alongside it in `db::Entry` so that a
/// fully in-memory database never pays for fields it never uses.
#[derive(Debug, Clone)]
pub enum Value {
    Str(StrValue),
    List(DList<Vec<u8>>),
    Set(Dict<Vec<u8>, ()>),
    ZSet(ZSetValue),
    Hash(HashValue),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Str(_) => ValueType::String,
            Value::List(_) => ValueType::List,
            Value::Set(_) => ValueType::Set,
            Value::ZSet(_) => ValueType::ZSet,
            Value::Hash(_) => ValueType::Hash,
        }
    }

    pub fn new_list() -> Self {
        Value::List(DList::new())
    }

    pub fn new_set() -> Self {
        Value::Set(Dict::new())
    }

    pub fn new_hash() -> Self {
        Value::Hash(HashValue::new())
    }

    pub fn new_zset() -> Self {
        Value::ZSet(ZSetValue::new())
    }

    pub fn as_str(&self) -> Option<&StrValue> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str_mut(&mut self) -> Option<&mut StrValue> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&DList<Vec<u8>>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut DList<Vec<u8>>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&Dict<Vec<u8>, ()>> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_set_mut(&mut self) -> Option<&mut Dict<Vec<u8>, ()>> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&HashValue> {
        match self {
            Value::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_hash_mut(&mut self) -> Option<&mut HashValue> {
        match self {
            Value::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_zset(&self) -> Option<&ZSetValue> {
        match self {
            Value::ZSet(z) => Some(z),
            _ => None,
        }
    }

    pub fn as_zset_mut(&mut self) -> Option<&mut ZSetValue> {
        match self {
            Value::ZSet(z) => Some(z),
            _ => None,
        }
    }

    /// Whether this value is empty and should cause its key to be deleted
    /// (§4.9 "any mutation that empties a container deletes the key").
    pub fn is_empty_container(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::List(l) => l.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::ZSet(z) => z.is_empty(),
            Value::Hash(h) => h.is_empty(),
        }
    }

    /// Rough in-memory footprint used for swap candidate scoring (§4.8) and
    /// maxmemory accounting — not a contract, only relative ordering matters.
    pub fn estimated_size(&self) -> usize {
        match self {
            Value::Str(s) => s.len(),
            Value::List(l) => l.iter().map(|v| v.len() + 8).sum::<usize>() + 16,
            Value::Set(s) => s.iter().map(|(k, _)| k.len() + 8).sum::<usize>() + 16,
            Value::Hash(h) => h.iter().iter().map(|(k, v)| k.len() + v.len() + 8).sum::<usize>() + 16,
            Value::ZSet(z) => z.iter_ascending().map(|(m, _)| m.len() + 16).sum::<usize>() + 16,
        }
    }

    pub fn push(&mut self, end: End, elem: Vec<u8>) -> Result<(), ()> {
        match self {
            Value::List(l) => {
                l.push(end, elem);
                Ok(())
            }
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trips_integer_encoding() {
        let v = StrValue::from_bytes(b"12345".to_vec());
        assert!(v.is_int());
        assert_eq!(v.as_bytes(), b"12345");
        let v2 = StrValue::from_bytes(b"012345".to_vec());
        assert!(!v2.is_int());
    }

    #[test]
    fn hash_promotes_past_entry_threshold() {
        let mut h = HashValue::new();
        for i in 0..10u32 {
            h.set(format!("f{i}").as_bytes(), b"v", 8, 512);
        }
        assert!(!h.is_packed());
        assert_eq!(h.len(), 10);
    }

    #[test]
    fn hash_promotes_past_value_size_threshold() {
        let mut h = HashValue::new();
        h.set(b"f1", b"v1", 64, 512);
        assert!(h.is_packed());
        let big = vec![b'x'; 513];
        h.set(b"f1", &big, 64, 512);
        assert!(!h.is_packed());
        assert_eq!(h.get(b"f1"), Some(big));
    }

    #[test]
    fn zset_reinsert_moves_member_under_new_score() {
        let mut z = ZSetValue::new();
        z.insert(b"m".to_vec(), 1.0);
        z.insert(b"x".to_vec(), 2.0);
        z.insert(b"m".to_vec(), 5.0);
        assert_eq!(z.score(b"m"), Some(5.0));
        assert_eq!(z.len(), 2);
        let ordered: Vec<_> = z.iter_ascending().map(|(m, _)| m.clone()).collect();
        assert_eq!(ordered, vec![b"x".to_vec(), b"m".to_vec()]);
    }
}
