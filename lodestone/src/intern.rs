//! Process-wide interned string pool.
//!
//! Interning maps equal strings onto one canonical allocation, so equality
//! becomes a pointer comparison and handles are cheap to copy around the
//! reflection registry, the VFS tree and the resource tables.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

static POOL: OnceLock<Mutex<HashSet<Arc<str>>>> = OnceLock::new();

fn pool() -> &'static Mutex<HashSet<Arc<str>>> {
    POOL.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Handle to a canonical string in the process-wide pool.
///
/// Equality and hashing are identity-based: two handles compare equal iff
/// they point at the same canonical allocation, which the pool guarantees
/// iff the texts are equal. Ordering falls back to string content so that
/// sorted tables stay deterministic across runs.
#[derive(Clone)]
pub struct InternedString(Arc<str>);

/// Intern `text`, returning the canonical handle for it.
pub fn intern(text: &str) -> InternedString {
    let mut pool = pool().lock();
    if let Some(existing) = pool.get(text) {
        return InternedString(existing.clone());
    }

    let canonical: Arc<str> = Arc::from(text);
    pool.insert(canonical.clone());
    InternedString(canonical)
}

impl InternedString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for InternedString {
    fn default() -> Self {
        intern("")
    }
}

impl PartialEq for InternedString {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for InternedString {}

impl Hash for InternedString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as *const u8 as usize).hash(state);
    }
}

impl PartialOrd for InternedString {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternedString {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Deref for InternedString {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for InternedString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl From<&str> for InternedString {
    fn from(value: &str) -> Self {
        intern(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_text_yields_identical_handle() {
        let a = intern("weapon_t");
        let b = intern("weapon_t");
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn different_texts_are_distinct() {
        assert_ne!(intern("alpha"), intern("beta"));
    }

    #[test]
    fn ordering_is_by_content() {
        let mut names = vec![intern("zeta"), intern("alpha"), intern("mid")];
        names.sort();
        let as_strs: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
        assert_eq!(as_strs, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn empty_string_interns() {
        let empty = intern("");
        assert!(empty.is_empty());
        assert_eq!(empty, InternedString::default());
    }
}
