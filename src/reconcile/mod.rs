//! Per-message reconciliation of streamed events into a clean transcript.
//!
//! [`ReconciliationEngine`] owns one [`MessageAccumulator`] per message id.
//! Text and reasoning fragments pass through the merge strategy so duplicated,
//! cumulative, or overlapping upstream chunks still produce a single copy of
//! every piece of content. The engine does no I/O and never suspends.

pub mod merge;
pub mod recent;

pub use merge::{apply_merge, decide_merge, MergeDecision, MergeStrategy, OverlapMerge};
pub use recent::{FragmentKind, RecentFragmentCache};

use crate::config::ReconcileConfig;
use crate::protocol::{StreamEvent, ToolCall, WebSearchResult};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

/// Lifecycle of one message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Empty,
    Accumulating,
    Finalized,
}

/// Everything known about one assistant message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageAccumulator {
    pub message_id: String,
    pub main_text: String,
    pub reasoning_text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub search_results: Vec<WebSearchResult>,
    pub search_stage: Option<String>,
    pub image_urls: Vec<String>,
    pub finish_reason: Option<String>,
    pub last_error: Option<String>,
    pub content_started: bool,
    pub is_complete: bool,
}

impl MessageAccumulator {
    fn new(message_id: &str) -> Self {
        Self {
            message_id: message_id.to_owned(),
            ..Self::default()
        }
    }
}

/// Which part of the message an event touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Text,
    Reasoning,
    ToolCalls,
    SearchStatus,
    SearchResults,
    Image,
    Error,
    Finished,
    /// The message was already finalized; the event had no effect.
    Ignored,
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageUpdate {
    pub message_id: String,
    pub kind: UpdateKind,
    /// Total main text after the event.
    pub content: String,
    /// Total reasoning text after the event.
    pub reasoning: Option<String>,
    pub changed: bool,
    /// True only for the event that produced the first non-blank main text.
    pub content_started: bool,
    pub finished: bool,
    /// Merge decision taken for text and reasoning fragments.
    pub decision: Option<MergeDecision>,
}

#[derive(Debug)]
struct MessageSlot {
    acc: MessageAccumulator,
    main_recent: RecentFragmentCache,
    reasoning_recent: RecentFragmentCache,
    events_applied: u64,
}

impl MessageSlot {
    fn new(message_id: &str, recent_capacity: usize) -> Self {
        Self {
            acc: MessageAccumulator::new(message_id),
            main_recent: RecentFragmentCache::new(recent_capacity),
            reasoning_recent: RecentFragmentCache::new(recent_capacity),
            events_applied: 0,
        }
    }

    fn state(&self) -> MessageState {
        if self.acc.is_complete {
            MessageState::Finalized
        } else if self.events_applied > 0 {
            MessageState::Accumulating
        } else {
            MessageState::Empty
        }
    }

    fn update(&self, kind: UpdateKind, changed: bool, decision: Option<MergeDecision>) -> MessageUpdate {
        MessageUpdate {
            message_id: self.acc.message_id.clone(),
            kind,
            content: self.acc.main_text.clone(),
            reasoning: self.acc.reasoning_text.clone(),
            changed,
            content_started: false,
            finished: self.acc.is_complete,
            decision,
        }
    }

    fn finalize(&mut self) {
        self.acc.is_complete = true;
        self.main_recent.clear();
        self.reasoning_recent.clear();
    }
}

/// Merge one fragment into `buffer`, consulting and updating `recent`.
///
/// Returns `(changed, decision)`; `decision` is `None` for blank fragments.
fn merge_fragment<S: MergeStrategy + ?Sized>(
    strategy: &S,
    buffer: &mut String,
    recent: &mut RecentFragmentCache,
    fragment: &str,
) -> (bool, Option<MergeDecision>) {
    if fragment.trim().is_empty() {
        return (false, None);
    }
    if recent.is_latest(fragment) {
        return (false, Some(MergeDecision::Duplicate));
    }
    // An older cumulative snapshot arriving late. Deltas are never matched
    // here, so a repeated token in a delta stream is still appended.
    if fragment.len() < buffer.len()
        && buffer.starts_with(fragment)
        && recent.is_replayed_snapshot(fragment)
    {
        return (false, Some(MergeDecision::Duplicate));
    }
    let decision = strategy.decide(buffer, fragment);
    let changed = apply_merge(buffer, fragment, decision);
    if decision == MergeDecision::Replace {
        recent.mark_cumulative();
    }
    if decision != MergeDecision::Duplicate {
        let kind = if buffer.as_str() == fragment {
            FragmentKind::Snapshot
        } else {
            FragmentKind::Delta
        };
        recent.record(fragment, kind);
    }
    (changed, Some(decision))
}

fn upsert_tool_call(calls: &mut Vec<ToolCall>, call: &ToolCall) -> bool {
    if !call.id.is_empty() {
        if let Some(existing) = calls.iter_mut().find(|existing| existing.id == call.id) {
            if *existing == *call {
                return false;
            }
            *existing = call.clone();
            return true;
        }
    }
    calls.push(call.clone());
    true
}

// ---------------------------------------------------------------------------
// ReconciliationEngine
// ---------------------------------------------------------------------------

pub struct ReconciliationEngine<S = OverlapMerge> {
    strategy: S,
    recent_capacity: usize,
    messages: FxHashMap<String, MessageSlot>,
}

impl ReconciliationEngine<OverlapMerge> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_strategy(OverlapMerge::default(), recent::DEFAULT_RECENT_CAPACITY)
    }

    #[must_use]
    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::with_strategy(
            OverlapMerge::new(config.overlap_window_chars),
            config.recent_fragment_capacity,
        )
    }
}

impl Default for ReconciliationEngine<OverlapMerge> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MergeStrategy> ReconciliationEngine<S> {
    #[must_use]
    pub fn with_strategy(strategy: S, recent_capacity: usize) -> Self {
        Self {
            strategy,
            recent_capacity: recent_capacity.max(1),
            messages: FxHashMap::default(),
        }
    }

    /// Apply one event to the message `message_id`, creating it if needed.
    pub fn apply(&mut self, message_id: &str, event: &StreamEvent) -> MessageUpdate {
        let strategy = &self.strategy;
        let recent_capacity = self.recent_capacity;
        let slot = self
            .messages
            .entry(message_id.to_owned())
            .or_insert_with(|| MessageSlot::new(message_id, recent_capacity));

        if slot.acc.is_complete {
            debug!(
                message_id,
                event_type = event.type_name(),
                "ignoring event for finalized message"
            );
            return slot.update(UpdateKind::Ignored, false, None);
        }
        slot.events_applied += 1;

        match event {
            StreamEvent::Content { text, .. } | StreamEvent::Text { text } => {
                let (changed, decision) =
                    merge_fragment(strategy, &mut slot.acc.main_text, &mut slot.main_recent, text);
                if let Some(decision) = decision {
                    trace!(message_id, decision = decision.label(), changed, "merged content fragment");
                }
                let started = !slot.acc.content_started && !slot.acc.main_text.trim().is_empty();
                if started {
                    slot.acc.content_started = true;
                }
                let mut update = slot.update(UpdateKind::Text, changed, decision);
                update.content_started = started;
                update
            }
            StreamEvent::Reasoning { text } => {
                if text.trim().is_empty() {
                    return slot.update(UpdateKind::Reasoning, false, None);
                }
                let reasoning = slot.acc.reasoning_text.get_or_insert_with(String::new);
                let (changed, decision) =
                    merge_fragment(strategy, reasoning, &mut slot.reasoning_recent, text);
                if let Some(decision) = decision {
                    trace!(message_id, decision = decision.label(), changed, "merged reasoning fragment");
                }
                slot.update(UpdateKind::Reasoning, changed, decision)
            }
            StreamEvent::ToolCall(call) => {
                let changed = upsert_tool_call(&mut slot.acc.tool_calls, call);
                slot.update(UpdateKind::ToolCalls, changed, None)
            }
            StreamEvent::WebSearchStatus { stage } => {
                let changed = slot.acc.search_stage.as_deref() != Some(stage.as_str());
                if changed {
                    slot.acc.search_stage = Some(stage.clone());
                }
                slot.update(UpdateKind::SearchStatus, changed, None)
            }
            StreamEvent::WebSearchResults { results } => {
                let changed = slot.acc.search_results != *results;
                if changed {
                    slot.acc.search_results.clone_from(results);
                }
                slot.update(UpdateKind::SearchResults, changed, None)
            }
            StreamEvent::ImageGeneration { image_url } => {
                let changed =
                    !image_url.is_empty() && !slot.acc.image_urls.iter().any(|url| url == image_url);
                if changed {
                    slot.acc.image_urls.push(image_url.clone());
                }
                slot.update(UpdateKind::Image, changed, None)
            }
            StreamEvent::Error {
                message,
                upstream_status,
            } => {
                let rendered = match upstream_status {
                    Some(status) => format!("{message} (HTTP {status})"),
                    None => message.clone(),
                };
                let changed = slot.acc.last_error.as_deref() != Some(rendered.as_str());
                slot.acc.last_error = Some(rendered);
                slot.update(UpdateKind::Error, changed, None)
            }
            StreamEvent::Finish { reason } => {
                slot.acc.finish_reason = Some(reason.clone());
                slot.finalize();
                slot.update(UpdateKind::Finished, true, None)
            }
            StreamEvent::StreamEnd { .. } => {
                slot.finalize();
                slot.update(UpdateKind::Finished, true, None)
            }
        }
    }

    /// Start a fresh turn for `message_id`, discarding previous state.
    pub fn begin_message(&mut self, message_id: &str) {
        self.messages.insert(
            message_id.to_owned(),
            MessageSlot::new(message_id, self.recent_capacity),
        );
    }

    #[must_use]
    pub fn state(&self, message_id: &str) -> MessageState {
        self.messages
            .get(message_id)
            .map_or(MessageState::Empty, MessageSlot::state)
    }

    #[must_use]
    pub fn accumulator(&self, message_id: &str) -> Option<&MessageAccumulator> {
        self.messages.get(message_id).map(|slot| &slot.acc)
    }

    /// Owned copy of the message for handing to a renderer.
    #[must_use]
    pub fn snapshot(&self, message_id: &str) -> Option<MessageAccumulator> {
        self.accumulator(message_id).cloned()
    }

    #[must_use]
    pub fn current_text(&self, message_id: &str) -> &str {
        self.accumulator(message_id)
            .map_or("", |acc| acc.main_text.as_str())
    }

    #[must_use]
    pub fn current_reasoning(&self, message_id: &str) -> Option<&str> {
        self.accumulator(message_id)
            .and_then(|acc| acc.reasoning_text.as_deref())
    }

    pub fn reset_message(&mut self, message_id: &str) {
        self.messages.remove(message_id);
    }

    pub fn reset(&mut self) {
        self.messages.clear();
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply_texts(engine: &mut ReconciliationEngine, id: &str, fragments: &[&str]) {
        for fragment in fragments {
            engine.apply(id, &StreamEvent::text(*fragment));
        }
    }

    #[test]
    fn test_exact_duplicate_is_idempotent() {
        let mut engine = ReconciliationEngine::new();
        engine.apply("m", &StreamEvent::text("Hi"));
        let update = engine.apply("m", &StreamEvent::text("Hi"));
        assert_eq!(engine.current_text("m"), "Hi");
        assert!(!update.changed);
        assert_eq!(update.content, "Hi");
        assert_eq!(update.decision, Some(MergeDecision::Duplicate));
    }

    #[test]
    fn test_cumulative_snapshot_supersedes() {
        let mut engine = ReconciliationEngine::new();
        apply_texts(&mut engine, "m", &["ab", "abc"]);
        assert_eq!(engine.current_text("m"), "abc");
    }

    #[test]
    fn test_overlap_merge_no_duplication() {
        let mut engine = ReconciliationEngine::new();
        apply_texts(&mut engine, "m", &["结果：", "：16 - 216", "16 - 216 = -200"]);
        let text = engine.current_text("m");
        assert_eq!(text.matches("16 - 216 = -200").count(), 1);
        assert!(!text.contains("16 - 21616 - 216"));
    }

    #[test]
    fn test_cumulative_chain_each_part_once() {
        let mut engine = ReconciliationEngine::new();
        apply_texts(
            &mut engine,
            "m",
            &["第一部分", "第一部分第二部分", "第一部分第二部分第三部分"],
        );
        let text = engine.current_text("m");
        assert_eq!(text, "第一部分第二部分第三部分");
        for part in ["第一部分", "第二部分", "第三部分"] {
            assert_eq!(text.matches(part).count(), 1);
        }
    }

    #[test]
    fn test_blank_fragments_are_noops() {
        let mut engine = ReconciliationEngine::new();
        engine.apply("m", &StreamEvent::text("X"));
        for blank in ["", "   ", "\n\n"] {
            let update = engine.apply("m", &StreamEvent::text(blank));
            assert!(!update.changed);
            assert_eq!(update.decision, None);
        }
        assert_eq!(engine.current_text("m").trim(), "X");
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut engine = ReconciliationEngine::new();
        engine.apply("m1", &StreamEvent::text("one"));
        engine.apply("m1", &StreamEvent::reasoning("thinking"));
        engine.reset();
        assert_eq!(engine.current_text("m1"), "");
        assert_eq!(engine.current_reasoning("m1"), None);
        assert_eq!(engine.message_count(), 0);

        engine.apply("m2", &StreamEvent::text("two"));
        assert_eq!(engine.current_text("m2"), "two");
        assert_eq!(engine.current_text("m1"), "");
    }

    #[test]
    fn test_messages_do_not_cross_contaminate() {
        let mut engine = ReconciliationEngine::new();
        engine.apply("a", &StreamEvent::text("Hello"));
        engine.apply("b", &StreamEvent::text("Hello"));
        engine.apply("a", &StreamEvent::text(" world"));
        assert_eq!(engine.current_text("a"), "Hello world");
        assert_eq!(engine.current_text("b"), "Hello");
    }

    #[test]
    fn test_content_started_transition_fires_once() {
        let mut engine = ReconciliationEngine::new();
        let first = engine.apply("m", &StreamEvent::reasoning("hmm"));
        assert!(!first.content_started);
        let blank = engine.apply("m", &StreamEvent::content("  "));
        assert!(!blank.content_started);
        let started = engine.apply("m", &StreamEvent::content("Answer"));
        assert!(started.content_started);
        let later = engine.apply("m", &StreamEvent::content(" more"));
        assert!(!later.content_started);
        assert!(engine.accumulator("m").unwrap().content_started);
    }

    #[test]
    fn test_reasoning_tracked_separately() {
        let mut engine = ReconciliationEngine::new();
        engine.apply("m", &StreamEvent::reasoning("step one"));
        engine.apply("m", &StreamEvent::reasoning("step one, step two"));
        engine.apply("m", &StreamEvent::text("done"));
        assert_eq!(engine.current_reasoning("m"), Some("step one, step two"));
        assert_eq!(engine.current_text("m"), "done");
    }

    #[test]
    fn test_replayed_stale_snapshot_discarded() {
        let mut engine = ReconciliationEngine::new();
        apply_texts(&mut engine, "m", &["ab", "abcd", "ab"]);
        assert_eq!(engine.current_text("m"), "abcd");
    }

    #[test]
    fn test_repeated_delta_token_is_appended() {
        let mut engine = ReconciliationEngine::new();
        apply_texts(&mut engine, "m", &["我", "认为", "我", "应该"]);
        assert_eq!(engine.current_text("m"), "我认为我应该");
    }

    #[test]
    fn test_delta_matching_buffer_start_is_appended() {
        let mut engine = ReconciliationEngine::new();
        apply_texts(&mut engine, "m", &["the", " cat", " sat.", "the"]);
        assert_eq!(engine.current_text("m"), "the cat sat.the");
    }

    #[test]
    fn test_reset_message_clears_only_that_message() {
        let mut engine = ReconciliationEngine::new();
        engine.apply("a", &StreamEvent::text("alpha"));
        engine.apply("a", &StreamEvent::finish("stop"));
        engine.apply("b", &StreamEvent::text("beta"));

        engine.reset_message("a");
        assert_eq!(engine.state("a"), MessageState::Empty);
        assert_eq!(engine.current_text("a"), "");
        assert_eq!(engine.current_text("b"), "beta");

        let update = engine.apply("a", &StreamEvent::text("alpha"));
        assert!(update.changed);
        assert_eq!(engine.current_text("a"), "alpha");
    }

    #[test]
    fn test_state_transitions_and_late_events() {
        let mut engine = ReconciliationEngine::new();
        assert_eq!(engine.state("m"), MessageState::Empty);
        engine.apply("m", &StreamEvent::text("Hi"));
        assert_eq!(engine.state("m"), MessageState::Accumulating);
        let finished = engine.apply("m", &StreamEvent::finish("stop"));
        assert!(finished.finished);
        assert_eq!(engine.state("m"), MessageState::Finalized);

        let late = engine.apply("m", &StreamEvent::text("Hi there"));
        assert_eq!(late.kind, UpdateKind::Ignored);
        assert!(!late.changed);
        assert_eq!(engine.current_text("m"), "Hi");
        let acc = engine.accumulator("m").unwrap();
        assert_eq!(acc.finish_reason.as_deref(), Some("stop"));
        assert!(acc.is_complete);
    }

    #[test]
    fn test_begin_message_starts_fresh_turn() {
        let mut engine = ReconciliationEngine::new();
        engine.apply("m", &StreamEvent::text("old"));
        engine.apply("m", &StreamEvent::StreamEnd { message_id: None });
        engine.begin_message("m");
        assert_eq!(engine.state("m"), MessageState::Empty);
        engine.apply("m", &StreamEvent::text("new"));
        assert_eq!(engine.current_text("m"), "new");
    }

    #[test]
    fn test_tool_calls_replace_by_id() {
        let mut engine = ReconciliationEngine::new();
        let call = |id: &str, args: serde_json::Value| {
            StreamEvent::ToolCall(ToolCall {
                id: id.to_string(),
                name: "search".to_string(),
                arguments: args,
                is_reasoning_step: None,
            })
        };
        engine.apply("m", &call("t1", json!({"q": "ru"})));
        engine.apply("m", &call("t2", json!({})));
        let update = engine.apply("m", &call("t1", json!({"q": "rust"})));
        assert!(update.changed);
        let again = engine.apply("m", &call("t1", json!({"q": "rust"})));
        assert!(!again.changed);

        let acc = engine.accumulator("m").unwrap();
        assert_eq!(acc.tool_calls.len(), 2);
        assert_eq!(acc.tool_calls[0].id, "t1");
        assert_eq!(acc.tool_calls[0].arguments, json!({"q": "rust"}));
        assert_eq!(acc.tool_calls[1].id, "t2");
    }

    #[test]
    fn test_search_results_replace_wholesale() {
        let mut engine = ReconciliationEngine::new();
        let result = |index: u32, title: &str| WebSearchResult {
            index,
            title: title.to_string(),
            href: format!("https://{title}"),
            snippet: String::new(),
        };
        engine.apply(
            "m",
            &StreamEvent::WebSearchResults {
                results: vec![result(0, "a"), result(1, "b")],
            },
        );
        engine.apply(
            "m",
            &StreamEvent::WebSearchResults {
                results: vec![result(0, "c")],
            },
        );
        let acc = engine.accumulator("m").unwrap();
        assert_eq!(acc.search_results, vec![result(0, "c")]);
    }

    #[test]
    fn test_status_image_and_error_recorded() {
        let mut engine = ReconciliationEngine::new();
        engine.apply(
            "m",
            &StreamEvent::WebSearchStatus {
                stage: "searching".to_string(),
            },
        );
        let url = StreamEvent::ImageGeneration {
            image_url: "https://img/1.png".to_string(),
        };
        assert!(engine.apply("m", &url).changed);
        assert!(!engine.apply("m", &url).changed);
        let error = engine.apply(
            "m",
            &StreamEvent::Error {
                message: "upstream failed".to_string(),
                upstream_status: Some(502),
            },
        );
        assert!(!error.finished);

        let acc = engine.snapshot("m").unwrap();
        assert_eq!(acc.search_stage.as_deref(), Some("searching"));
        assert_eq!(acc.image_urls, vec!["https://img/1.png".to_string()]);
        assert_eq!(acc.last_error.as_deref(), Some("upstream failed (HTTP 502)"));
        assert_eq!(engine.state("m"), MessageState::Accumulating);
    }

    struct AlwaysAppend;

    impl MergeStrategy for AlwaysAppend {
        fn decide(&self, _buffer: &str, fragment: &str) -> MergeDecision {
            if fragment.is_empty() {
                MergeDecision::Duplicate
            } else {
                MergeDecision::Append
            }
        }
    }

    #[test]
    fn test_custom_strategy_is_used() {
        let mut engine = ReconciliationEngine::with_strategy(AlwaysAppend, 4);
        engine.apply("m", &StreamEvent::text("ab"));
        engine.apply("m", &StreamEvent::text("abc"));
        assert_eq!(engine.current_text("m"), "ababc");
    }
}
