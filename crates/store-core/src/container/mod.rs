//! Generic container primitives (§3, §4.1): the byte-buffer helpers behind
//! binary-safe strings, a resizable chained hash table, a doubly-ended
//! ordered list, and the packed small-map encoding used by compact hashes.

pub mod dict;
pub mod dlist;
pub mod packed_map;
pub mod sds;
pub mod skiplist;

pub use dict::Dict;
pub use dlist::{DList, End};
pub use packed_map::PackedMap;
pub use skiplist::SkipList;
