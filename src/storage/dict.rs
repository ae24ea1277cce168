//! Sharded Keyspace Dictionary
//!
//! [`Dict`] is the in-memory map behind one logical database. It holds keys in
//! a fixed number of shards, each an independent `RwLock<HashMap>`, so commands
//! touching different keys rarely contend.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Dict                               │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │Shard 63 │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A poisoned lock is recovered rather than propagated: a panic in one command
//! must not make the keyspace unusable for every later command.

use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Number of shards per dictionary.
const NUM_SHARDS: usize = 64;

/// A value stored in the keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    String(Bytes),
}

impl Entity {
    /// The name reported by the `TYPE` command.
    pub fn type_name(&self) -> &'static str {
        match self {
            Entity::String(_) => "string",
        }
    }
}

#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<Bytes, Entity>>,
}

impl Shard {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Bytes, Entity>> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Bytes, Entity>> {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Thread-safe keyspace for one database.
///
/// # Example
///
/// ```
/// use ringkv::storage::{Dict, Entity};
/// use bytes::Bytes;
///
/// let dict = Dict::new();
/// dict.put(Bytes::from("name"), Entity::String(Bytes::from("Ariz")));
/// assert_eq!(
///     dict.get(b"name"),
///     Some(Entity::String(Bytes::from("Ariz")))
/// );
/// ```
pub struct Dict {
    shards: Vec<Shard>,
}

impl std::fmt::Debug for Dict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dict")
            .field("shards", &self.shards.len())
            .field("len", &self.len())
            .finish()
    }
}

impl Default for Dict {
    fn default() -> Self {
        Self::new()
    }
}

impl Dict {
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
        }
    }

    /// Determines which shard a key belongs to.
    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    pub fn get(&self, key: &[u8]) -> Option<Entity> {
        self.shard(key).read().get(key).cloned()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.shard(key).read().contains_key(key)
    }

    /// Inserts or overwrites `key`.
    ///
    /// Returns `true` if the key was newly created.
    pub fn put(&self, key: Bytes, value: Entity) -> bool {
        self.shard(&key).write().insert(key, value).is_none()
    }

    /// Inserts `key` only if it does not exist. Returns `true` if inserted.
    pub fn put_if_absent(&self, key: Bytes, value: Entity) -> bool {
        let shard = self.shard(&key);
        let mut data = shard.write();
        if data.contains_key(&key) {
            return false;
        }
        data.insert(key, value);
        true
    }

    /// Stores `value` and returns the previous value, atomically.
    pub fn replace(&self, key: Bytes, value: Entity) -> Option<Entity> {
        self.shard(&key).write().insert(key, value)
    }

    pub fn remove(&self, key: &[u8]) -> Option<Entity> {
        self.shard(key).write().remove(key)
    }

    /// Removes every key in `keys`, returning how many existed.
    pub fn remove_all(&self, keys: &[Bytes]) -> usize {
        keys.iter().filter(|key| self.remove(key).is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    /// Returns all keys matching a glob-style pattern.
    ///
    /// Supported patterns:
    /// - `*` matches everything
    /// - `h?llo` matches hello, hallo, but not hllo
    /// - `h[ae]llo` matches hello and hallo, `h[^e]llo` everything but hello
    /// - `h[a-b]llo` matches hallo and hbllo
    /// - `\` escapes the next character
    ///
    /// **Warning**: This scans every shard.
    pub fn keys(&self, pattern: &[u8]) -> Vec<Bytes> {
        let pattern = GlobPattern::new(pattern);
        let mut result = Vec::new();
        self.for_each(|key, _| {
            if pattern.matches(key) {
                result.push(key.clone());
            }
            true
        });
        result
    }

    /// Visits every entry until `visit` returns `false`.
    ///
    /// Each shard is visited under its read lock, so `visit` must not touch
    /// this dictionary.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&Bytes, &Entity) -> bool,
    {
        for shard in &self.shards {
            let data = shard.read();
            for (key, value) in data.iter() {
                if !visit(key, value) {
                    return;
                }
            }
        }
    }

    /// Removes every key.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }

    /// Moves `from` to `to`, overwriting `to`. Returns `false` if `from` is missing.
    ///
    /// Both shard locks are taken together, in index order, so the move is atomic.
    pub fn rename(&self, from: &[u8], to: Bytes) -> bool {
        self.rename_inner(from, to, true).is_some()
    }

    /// Like [`Dict::rename`] but leaves both keys alone when `to` exists.
    ///
    /// Returns `None` if `from` is missing, `Some(false)` if `to` exists.
    pub fn rename_if_absent(&self, from: &[u8], to: Bytes) -> Option<bool> {
        self.rename_inner(from, to, false)
    }

    /// Both checks run under the shard locks.
    fn rename_inner(&self, from: &[u8], to: Bytes, overwrite: bool) -> Option<bool> {
        let src = self.shard_index(from);
        let dst = self.shard_index(&to);

        if src == dst {
            let mut data = self.shards[src].write();
            if !data.contains_key(from) {
                return None;
            }
            if !overwrite && data.contains_key(&to) {
                return Some(false);
            }
            if let Some(value) = data.remove(from) {
                data.insert(to, value);
            }
            return Some(true);
        }

        let (mut src_data, mut dst_data) = if src < dst {
            let a = self.shards[src].write();
            let b = self.shards[dst].write();
            (a, b)
        } else {
            let b = self.shards[dst].write();
            let a = self.shards[src].write();
            (a, b)
        };

        if !src_data.contains_key(from) {
            return None;
        }
        if !overwrite && dst_data.contains_key(&to) {
            return Some(false);
        }
        if let Some(value) = src_data.remove(from) {
            dst_data.insert(to, value);
        }
        Some(true)
    }
}

/// Glob pattern matcher for the KEYS command.
struct GlobPattern<'a> {
    pattern: &'a [u8],
}

impl<'a> GlobPattern<'a> {
    fn new(pattern: &'a [u8]) -> Self {
        Self { pattern }
    }

    fn matches(&self, text: &[u8]) -> bool {
        Self::matches_recursive(self.pattern, text)
    }

    fn matches_recursive(pattern: &[u8], text: &[u8]) -> bool {
        if pattern.is_empty() {
            return text.is_empty();
        }

        match pattern[0] {
            b'*' => {
                // Collapse runs of stars
                let rest = &pattern[1..];
                if rest.is_empty() {
                    return true;
                }
                (0..=text.len()).any(|i| Self::matches_recursive(rest, &text[i..]))
            }
            b'?' => !text.is_empty() && Self::matches_recursive(&pattern[1..], &text[1..]),
            b'[' => {
                let Some(&c) = text.first() else {
                    return false;
                };

                let mut i = 1;
                let negate = pattern.get(1) == Some(&b'^');
                if negate {
                    i += 1;
                }

                let mut matched = false;
                while i < pattern.len() && pattern[i] != b']' {
                    if pattern[i] == b'\\' && i + 1 < pattern.len() {
                        i += 1;
                        matched |= pattern[i] == c;
                    } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
                        let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                            (pattern[i], pattern[i + 2])
                        } else {
                            (pattern[i + 2], pattern[i])
                        };
                        matched |= (lo..=hi).contains(&c);
                        i += 2;
                    } else {
                        matched |= pattern[i] == c;
                    }
                    i += 1;
                }

                // Unterminated class
                if i >= pattern.len() {
                    return false;
                }
                (matched != negate) && Self::matches_recursive(&pattern[i + 1..], &text[1..])
            }
            b'\\' if pattern.len() > 1 => {
                !text.is_empty()
                    && pattern[1] == text[0]
                    && Self::matches_recursive(&pattern[2..], &text[1..])
            }
            c => {
                !text.is_empty()
                    && c == text[0]
                    && Self::matches_recursive(&pattern[1..], &text[1..])
            }
        }
    }
}
