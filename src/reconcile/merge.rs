//! Pure merge decisions for incrementally streamed text.
//!
//! Upstreams may send strict deltas, full cumulative snapshots, or chunks that
//! repeat the tail of what was already sent. The decision order is fixed:
//! exact duplicate, cumulative snapshot, then boundary overlap or plain append.

/// How a fragment combines with the current buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Nothing new; the buffer is unchanged.
    Duplicate,
    /// The fragment is a cumulative snapshot and becomes the buffer.
    Replace,
    /// The fragment is new content appended as-is.
    Append,
    /// The first `overlap` bytes of the fragment repeat the buffer's tail.
    Overlap { overlap: usize },
}

impl MergeDecision {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            MergeDecision::Duplicate => "duplicate",
            MergeDecision::Replace => "replace",
            MergeDecision::Append => "append",
            MergeDecision::Overlap { .. } => "overlap",
        }
    }
}

/// Strategy seam for the text merge heuristic.
pub trait MergeStrategy: Send + Sync {
    fn decide(&self, buffer: &str, fragment: &str) -> MergeDecision;
}

pub const DEFAULT_OVERLAP_WINDOW_CHARS: usize = 512;

/// Suffix/prefix overlap detection over a bounded trailing window.
#[derive(Debug, Clone, Copy)]
pub struct OverlapMerge {
    pub window_chars: usize,
}

impl OverlapMerge {
    #[must_use]
    pub fn new(window_chars: usize) -> Self {
        Self {
            window_chars: window_chars.max(1),
        }
    }
}

impl Default for OverlapMerge {
    fn default() -> Self {
        Self::new(DEFAULT_OVERLAP_WINDOW_CHARS)
    }
}

impl MergeStrategy for OverlapMerge {
    #[inline]
    fn decide(&self, buffer: &str, fragment: &str) -> MergeDecision {
        decide_merge(buffer, fragment, self.window_chars)
    }
}

/// Classify `fragment` against `buffer`.
#[must_use]
pub fn decide_merge(buffer: &str, fragment: &str, window_chars: usize) -> MergeDecision {
    if fragment.is_empty() || fragment == buffer {
        return MergeDecision::Duplicate;
    }
    if buffer.is_empty() {
        return MergeDecision::Append;
    }
    if fragment.len() >= buffer.len() && fragment.starts_with(buffer) {
        return MergeDecision::Replace;
    }
    match boundary_overlap(buffer, fragment, window_chars) {
        0 => MergeDecision::Append,
        overlap if overlap == fragment.len() => MergeDecision::Duplicate,
        overlap => MergeDecision::Overlap { overlap },
    }
}

/// Byte length of the longest fragment prefix that is also a suffix of
/// `buffer`, considering at most `window_chars` characters.
///
/// One prefix-function pass over the fragment window and one matching pass
/// over the same length of buffer tail, so the cost is linear in the window.
#[must_use]
pub fn boundary_overlap(buffer: &str, fragment: &str, window_chars: usize) -> usize {
    let window_end = fragment
        .char_indices()
        .nth(window_chars)
        .map_or(fragment.len(), |(idx, _)| idx);
    let pattern = &fragment.as_bytes()[..window_end.min(buffer.len())];
    if pattern.is_empty() {
        return 0;
    }
    let failure = prefix_function(pattern);
    let mut matched = 0usize;
    for &byte in &buffer.as_bytes()[buffer.len() - pattern.len()..] {
        while matched > 0 && (matched == pattern.len() || pattern[matched] != byte) {
            matched = failure[matched - 1];
        }
        if pattern[matched] == byte {
            matched += 1;
        }
    }
    while matched > 0 && !fragment.is_char_boundary(matched) {
        matched = failure[matched - 1];
    }
    matched
}

/// `failure[i]` is the length of the longest proper prefix of
/// `pattern[..=i]` that is also its suffix.
fn prefix_function(pattern: &[u8]) -> Vec<usize> {
    let mut failure = vec![0usize; pattern.len()];
    let mut k = 0usize;
    for idx in 1..pattern.len() {
        while k > 0 && pattern[idx] != pattern[k] {
            k = failure[k - 1];
        }
        if pattern[idx] == pattern[k] {
            k += 1;
        }
        failure[idx] = k;
    }
    failure
}

/// Apply a decision to `buffer`. Returns whether the buffer changed.
pub fn apply_merge(buffer: &mut String, fragment: &str, decision: MergeDecision) -> bool {
    match decision {
        MergeDecision::Duplicate => false,
        MergeDecision::Replace => {
            if buffer == fragment {
                return false;
            }
            buffer.clear();
            buffer.push_str(fragment);
            true
        }
        MergeDecision::Append => {
            buffer.push_str(fragment);
            !fragment.is_empty()
        }
        MergeDecision::Overlap { overlap } => match fragment.get(overlap..) {
            Some(rest) if !rest.is_empty() => {
                buffer.push_str(rest);
                true
            }
            _ => false,
        },
    }
}
