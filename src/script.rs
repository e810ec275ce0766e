//! Process-wide script-text to SHA-1 digest table.
//!
//! Purely a local optimization for the EVAL to EVALSHA rewrite: a miss only
//! costs a digest recomputation, never a visible error.

use std::fmt::Write as _;

use hashbrown::HashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};

const DIGEST_TABLE_CAPACITY: usize = 500;

static DIGEST_TABLE: Lazy<Mutex<DigestTable>> =
    Lazy::new(|| Mutex::new(DigestTable::new(DIGEST_TABLE_CAPACITY)));

/// SHA-1 hex digest of a script, served from the shared table when cached.
pub fn script_digest(script: &str) -> String {
    let mut table = DIGEST_TABLE.lock();
    if let Some(digest) = table.get(script) {
        return digest;
    }
    let digest = sha1_hex(script);
    table.insert(script.to_string(), digest.clone());
    digest
}

pub fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

/// Bounded LRU over script text. Access order is tracked with a monotonic
/// stamp; eviction removes the stalest entry. The policy is not externally
/// observable, only the bound is.
struct DigestTable {
    entries: HashMap<String, TableEntry>,
    counter: u64,
    capacity: usize,
}

struct TableEntry {
    digest: String,
    access: u64,
}

impl DigestTable {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            counter: 0,
            capacity: capacity.max(1),
        }
    }

    fn get(&mut self, script: &str) -> Option<String> {
        self.counter = self.counter.wrapping_add(1);
        let stamp = self.counter;
        let entry = self.entries.get_mut(script)?;
        entry.access = stamp;
        Some(entry.digest.clone())
    }

    fn insert(&mut self, script: String, digest: String) {
        self.counter = self.counter.wrapping_add(1);
        self.entries.insert(
            script,
            TableEntry {
                digest,
                access: self.counter,
            },
        );
        while self.entries.len() > self.capacity {
            self.evict_stalest();
        }
    }

    fn evict_stalest(&mut self) {
        let stalest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.access)
            .map(|(script, _)| script.clone());
        if let Some(script) = stalest {
            self.entries.remove(&script);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_matches_reference_vectors() {
        assert_eq!(
            sha1_hex("return 1"),
            "e0e1f9fabfc9d4800c877a703b823ac0578ff8db"
        );
        assert_eq!(
            sha1_hex("return KEYS[1]"),
            "4a2267357833227dd98abdedb8cf24b15a986445"
        );
    }

    #[test]
    fn digest_is_stable_across_lookups() {
        let first = script_digest("return KEYS[1]");
        let second = script_digest("return KEYS[1]");
        assert_eq!(first, second);
        assert_eq!(first, "4a2267357833227dd98abdedb8cf24b15a986445");
    }

    #[test]
    fn table_evicts_stalest_entry_at_capacity() {
        let mut table = DigestTable::new(2);
        table.insert("a".into(), "da".into());
        table.insert("b".into(), "db".into());
        // touch "a" so "b" becomes the eviction candidate
        assert_eq!(table.get("a"), Some("da".into()));
        table.insert("c".into(), "dc".into());
        assert_eq!(table.len(), 2);
        assert!(table.get("b").is_none());
        assert_eq!(table.get("a"), Some("da".into()));
        assert_eq!(table.get("c"), Some("dc".into()));
    }
}
