//! Probabilistic ordered index backing sorted sets (§4.10): a classic
//! skip list with per-forward-pointer spans for O(log N) rank queries, the
//! same structure (max level 32, promotion probability 1/4, single
//! backward pointer at level 1) the spec describes. Built over an index
//! arena instead of raw pointers so deletion and insertion stay in safe
//! Rust without reference-counted interior nodes.

use std::cmp::Ordering;

const MAX_LEVEL: usize = 32;
const P_NUMERATOR: u64 = 1 << 16; // P = 1/4, compared against a 18-bit draw
const P_SHIFT: u32 = 18;

#[derive(Debug, Clone)]
struct Node<T> {
    /// `None` only for the header sentinel at index 0.
    member: Option<T>,
    score: f64,
    forward: Vec<Option<usize>>,
    span: Vec<u64>,
    backward: Option<usize>,
}

/// A tiny xorshift64* PRNG — the only randomness the skip list needs is
/// level promotion, so pulling in a full `rand` dependency for this one
/// call site isn't worth it.
#[derive(Debug, Clone)]
struct Rng(u64);

impl Rng {
    fn seeded() -> Self {
        use std::collections::hash_map::RandomState;
        use std::hash::{BuildHasher, Hasher};
        let mut h = RandomState::new().build_hasher();
        h.write_u64(0x9E37_79B9_7F4A_7C15);
        let seed = h.finish() | 1;
        Rng(seed)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

#[derive(Debug, Clone)]
pub struct SkipList<T> {
    nodes: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    level: usize,
    length: u64,
    rng: Rng,
}

fn cmp_key<T: Ord>(a_score: f64, a: &T, b_score: f64, b: &T) -> Ordering {
    match a_score.partial_cmp(&b_score) {
        Some(Ordering::Equal) | None => a.cmp(b),
        Some(o) => o,
    }
}

impl<T: Ord + Clone> SkipList<T> {
    pub fn new() -> Self {
        let header = Node {
            member: None,
            score: f64::NEG_INFINITY,
            forward: vec![None; MAX_LEVEL],
            span: vec![0; MAX_LEVEL],
            backward: None,
        };
        Self {
            nodes: vec![Some(header)],
            free: Vec::new(),
            level: 1,
            length: 0,
            rng: Rng::seeded(),
        }
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn random_level(&mut self) -> usize {
        let mut lvl = 1;
        while (self.rng.next_u64() & ((1u64 << P_SHIFT) - 1)) < P_NUMERATOR && lvl < MAX_LEVEL {
            lvl += 1;
        }
        lvl
    }

    fn node(&self, idx: usize) -> &Node<T> {
        self.nodes[idx].as_ref().unwrap()
    }

    /// Inserts `(score, member)`. Caller (the ZSET value) is responsible for
    /// removing any previous entry for `member` first — a skip list alone
    /// has no "by member" index.
    pub fn insert(&mut self, score: f64, member: T) {
        let mut update = [0usize; MAX_LEVEL];
        let mut rank = [0u64; MAX_LEVEL];
        let mut x = 0usize;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            while let Some(next) = self.node(x).forward[i] {
                let n = self.node(next);
                if cmp_key(n.score, n.member.as_ref().unwrap(), score, &member) == Ordering::Less {
                    rank[i] += self.node(x).span[i];
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x;
        }

        let new_level = self.random_level();
        if new_level > self.level {
            for i in self.level..new_level {
                rank[i] = 0;
                update[i] = 0;
                let header = self.nodes[0].as_mut().unwrap();
                header.span[i] = self.length;
            }
            self.level = new_level;
        }

        let mut forward = vec![None; new_level];
        let mut span = vec![0u64; new_level];
        let new_idx = self.alloc(Node {
            member: Some(member),
            score,
            forward: vec![None; new_level],
            span: vec![0; new_level],
            backward: None,
        });

        for i in 0..new_level {
            let pred = update[i];
            let pred_forward = self.node(pred).forward[i];
            forward[i] = pred_forward;
            span[i] = self.node(pred).span[i].saturating_sub(rank[0] - rank[i]);
            let pred_span = rank[0] - rank[i] + 1;
            self.nodes[pred].as_mut().unwrap().forward[i] = Some(new_idx);
            self.nodes[pred].as_mut().unwrap().span[i] = pred_span;
        }
        {
            let n = self.nodes[new_idx].as_mut().unwrap();
            n.forward = forward;
            n.span = span;
            n.backward = if update[0] == 0 { None } else { Some(update[0]) };
        }
        for i in new_level..self.level {
            self.nodes[update[i]].as_mut().unwrap().span[i] += 1;
        }
        if let Some(next) = self.node(new_idx).forward[0] {
            self.nodes[next].as_mut().unwrap().backward = Some(new_idx);
        }
        self.length += 1;
    }

    fn alloc(&mut self, node: Node<T>) -> usize {
        if let Some(idx) = self.free.pop() {
            self.nodes[idx] = Some(node);
            idx
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    pub fn remove(&mut self, score: f64, member: &T) -> bool {
        let mut update = [0usize; MAX_LEVEL];
        let mut x = 0usize;
        for i in (0..self.level).rev() {
            while let Some(next) = self.node(x).forward[i] {
                let n = self.node(next);
                if cmp_key(n.score, n.member.as_ref().unwrap(), score, member) == Ordering::Less {
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x;
        }
        let target = self.node(x).forward[0];
        let target = match target {
            Some(t) if self.node(t).score == score && self.node(t).member.as_ref() == Some(member) => t,
            _ => return false,
        };
        self.splice_out(target, &update);
        true
    }

    fn splice_out(&mut self, target: usize, update: &[usize; MAX_LEVEL]) {
        for i in 0..self.level {
            let pred = update[i];
            if self.node(pred).forward.get(i) == Some(&Some(target)) {
                let tgt_forward = self.node(target).forward[i];
                let tgt_span = self.node(target).span[i];
                let pred_node = self.nodes[pred].as_mut().unwrap();
                pred_node.forward[i] = tgt_forward;
                pred_node.span[i] = pred_node.span[i] + tgt_span - 1;
            } else {
                self.nodes[pred].as_mut().unwrap().span[i] -= 1;
            }
        }
        if let Some(next) = self.node(target).forward[0] {
            let back = self.node(target).backward;
            self.nodes[next].as_mut().unwrap().backward = back;
        }
        while self.level > 1 && self.node(0).forward[self.level - 1].is_none() {
            self.level -= 1;
        }
        self.nodes[target] = None;
        self.free.push(target);
        self.length -= 1;
    }

    /// 0-based rank of `member` with `score`, ascending, or `None`.
    pub fn rank(&self, score: f64, member: &T) -> Option<u64> {
        let mut x = 0usize;
        let mut rank = 0u64;
        for i in (0..self.level).rev() {
            while let Some(next) = self.node(x).forward[i] {
                let n = self.node(next);
                if cmp_key(n.score, n.member.as_ref().unwrap(), score, member) != Ordering::Greater {
                    rank += self.node(x).span[i];
                    x = next;
                    if n.score == score && n.member.as_ref() == Some(member) {
                        return Some(rank - 1);
                    }
                } else {
                    break;
                }
            }
        }
        None
    }

    /// Iterates ascending from the lowest element.
    pub fn iter(&self) -> impl Iterator<Item = (&T, f64)> {
        let mut cur = self.node(0).forward[0];
        std::iter::from_fn(move || {
            let idx = cur?;
            let n = self.node(idx);
            cur = n.forward[0];
            Some((n.member.as_ref().unwrap(), n.score))
        })
    }

    /// Iterates descending from the highest element.
    pub fn iter_rev(&self) -> impl Iterator<Item = (&T, f64)> {
        let mut cur = self.tail();
        std::iter::from_fn(move || {
            let idx = cur?;
            let n = self.node(idx);
            cur = n.backward;
            Some((n.member.as_ref().unwrap(), n.score))
        })
    }

    fn tail(&self) -> Option<usize> {
        let mut x = 0usize;
        for i in (0..self.level).rev() {
            while let Some(next) = self.node(x).forward[i] {
                x = next;
            }
        }
        if x == 0 { None } else { Some(x) }
    }

    /// Elements at 0-based ranks `[start, stop]` inclusive, ascending.
    pub fn range_by_rank(&self, start: u64, stop: u64) -> Vec<(&T, f64)> {
        if self.length == 0 || start > stop {
            return Vec::new();
        }
        let stop = stop.min(self.length - 1);
        self.iter().skip(start as usize).take((stop - start + 1) as usize).collect()
    }

    /// First element with score >= `min` (or > `min` if `min_exclusive`).
    pub fn range_by_score(
        &self,
        min: f64,
        min_exclusive: bool,
        max: f64,
        max_exclusive: bool,
    ) -> Vec<(&T, f64)> {
        self.iter()
            .filter(|(_, s)| {
                let lo_ok = if min_exclusive { *s > min } else { *s >= min };
                let hi_ok = if max_exclusive { *s < max } else { *s <= max };
                lo_ok && hi_ok
            })
            .collect()
    }
}

impl<T: Ord + Clone> Default for SkipList<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_and_range_track_insertions() {
        let mut sl: SkipList<String> = SkipList::new();
        sl.insert(1.0, "x".to_string());
        sl.insert(2.0, "y".to_string());
        sl.insert(1.5, "w".to_string());
        assert_eq!(sl.len(), 3);
        let ordered: Vec<_> = sl.iter().map(|(m, s)| (m.clone(), s)).collect();
        assert_eq!(
            ordered,
            vec![("x".to_string(), 1.0), ("w".to_string(), 1.5), ("y".to_string(), 2.0)]
        );
        assert_eq!(sl.rank(1.5, &"w".to_string()), Some(1));
    }

    #[test]
    fn duplicate_scores_break_ties_lexicographically() {
        let mut sl: SkipList<String> = SkipList::new();
        sl.insert(1.0, "b".to_string());
        sl.insert(1.0, "a".to_string());
        sl.insert(1.0, "c".to_string());
        let ordered: Vec<_> = sl.iter().map(|(m, _)| m.clone()).collect();
        assert_eq!(ordered, vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_maintains_spans_for_rank_queries() {
        let mut sl: SkipList<i64> = SkipList::new();
        for i in 0..50 {
            sl.insert(i as f64, i);
        }
        assert!(sl.remove(25.0, &25));
        assert_eq!(sl.len(), 49);
        assert_eq!(sl.rank(26.0, &26), Some(24));
        let ranked: Vec<_> = sl.range_by_rank(0, 2).into_iter().map(|(m, _)| *m).collect();
        assert_eq!(ranked, vec![0, 1, 2]);
    }

    #[test]
    fn reverse_iteration_matches_forward_reversed() {
        let mut sl: SkipList<i64> = SkipList::new();
        for i in 0..20 {
            sl.insert(i as f64, i);
        }
        let fwd: Vec<_> = sl.iter().map(|(m, _)| *m).collect();
        let mut rev: Vec<_> = sl.iter_rev().map(|(m, _)| *m).collect();
        rev.reverse();
        assert_eq!(fwd, rev);
    }
}
