use rustc_hash::FxBuildHasher;
use std::collections::VecDeque;
use std::hash::BuildHasher;

pub const DEFAULT_RECENT_CAPACITY: usize = 12;

/// How a recorded fragment related to the buffer once applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// The fragment added to the buffer.
    Delta,
    /// The buffer equalled the fragment after applying it.
    Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecentEntry {
    fragment_hash: u64,
    len: usize,
    kind: FragmentKind,
}

/// Bounded history of the most recently applied fragments.
///
/// Only hashes and lengths are kept; membership is equality-based. The cache
/// also remembers whether the upstream has been seen sending cumulative
/// snapshots, which is the only case where an older fragment can be replayed.
#[derive(Debug, Clone)]
pub struct RecentFragmentCache {
    capacity: usize,
    entries: VecDeque<RecentEntry>,
    cumulative: bool,
}

impl RecentFragmentCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            cumulative: false,
        }
    }

    #[inline]
    fn hash(fragment: &str) -> u64 {
        FxBuildHasher.hash_one(fragment)
    }

    #[inline]
    fn matches(entry: &RecentEntry, hash: u64, len: usize) -> bool {
        entry.fragment_hash == hash && entry.len == len
    }

    #[must_use]
    pub fn contains(&self, fragment: &str) -> bool {
        let hash = Self::hash(fragment);
        self.entries
            .iter()
            .any(|entry| Self::matches(entry, hash, fragment.len()))
    }

    /// Whether `fragment` is the most recently recorded one.
    #[must_use]
    pub fn is_latest(&self, fragment: &str) -> bool {
        self.entries
            .back()
            .is_some_and(|entry| Self::matches(entry, Self::hash(fragment), fragment.len()))
    }

    /// Whether `fragment` was recorded as a whole-buffer snapshot of an
    /// upstream known to send cumulative snapshots.
    #[must_use]
    pub fn is_replayed_snapshot(&self, fragment: &str) -> bool {
        if !self.cumulative {
            return false;
        }
        let hash = Self::hash(fragment);
        self.entries.iter().any(|entry| {
            entry.kind == FragmentKind::Snapshot && Self::matches(entry, hash, fragment.len())
        })
    }

    pub fn record(&mut self, fragment: &str, kind: FragmentKind) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(RecentEntry {
            fragment_hash: Self::hash(fragment),
            len: fragment.len(),
            kind,
        });
    }

    /// Note that a fragment superseded the buffer as a cumulative snapshot.
    pub fn mark_cumulative(&mut self) {
        self.cumulative = true;
    }

    #[must_use]
    pub fn is_cumulative(&self) -> bool {
        self.cumulative
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cumulative = false;
    }
}

impl Default for RecentFragmentCache {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}
