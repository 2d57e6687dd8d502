//! In-process session store.
//!
//! One record per session id, guarded by a per-session mutex under a shared
//! read/write map — concurrent requests to the same session serialize their
//! writes; requests to different sessions do not contend. Sessions are
//! created on first touch, refreshed on every read or write, and expired by
//! a periodic sweep after the idle TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use fin_domain::config::SessionsConfig;
use fin_domain::tool::Message;

use crate::types::{
    Artifact, Session, SessionStats, SourceKind, Turn, TurnRole,
};

struct Slot {
    session: Session,
    last_touched: Instant,
}

/// Shared, TTL'd session store.
pub struct SessionStore {
    slots: RwLock<HashMap<String, Arc<Mutex<Slot>>>>,
    ttl: Duration,
    artifact_max_count: usize,
    artifact_max_chars: usize,
}

impl SessionStore {
    pub fn new(config: &SessionsConfig) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(config.ttl_secs),
            artifact_max_count: config.artifact_max_count,
            artifact_max_chars: config.artifact_max_chars,
        }
    }

    /// Fetch the slot for a session, creating it if absent or expired.
    /// Refreshes the TTL clock.
    fn slot(&self, session_id: &str) -> Arc<Mutex<Slot>> {
        // Fast path: live session.
        {
            let slots = self.slots.read();
            if let Some(slot) = slots.get(session_id) {
                let mut guard = slot.lock();
                if guard.last_touched.elapsed() < self.ttl {
                    guard.last_touched = Instant::now();
                    guard.session.metadata.last_touched = Some(Utc::now());
                    drop(guard);
                    return slot.clone();
                }
                // Expired in place: reset below under the write lock.
            }
        }

        let mut slots = self.slots.write();
        let slot = slots
            .entry(session_id.to_owned())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Slot {
                    session: Session::default(),
                    last_touched: Instant::now(),
                }))
            })
            .clone();
        {
            let mut guard = slot.lock();
            if guard.last_touched.elapsed() >= self.ttl {
                tracing::debug!(session_id, "session expired, starting fresh");
                guard.session = Session::default();
            }
            guard.last_touched = Instant::now();
            guard.session.metadata.last_touched = Some(Utc::now());
        }
        slot
    }

    /// Create the session if needed and refresh its TTL.
    pub fn touch_or_create(&self, session_id: &str) {
        let _ = self.slot(session_id);
    }

    /// Append a conversation turn; returns the updated turn count.
    ///
    /// Timestamps are forced monotone: a turn never carries a `created_at`
    /// earlier than its predecessor's.
    pub fn append_turn(&self, session_id: &str, mut turn: Turn) -> usize {
        let slot = self.slot(session_id);
        let mut guard = slot.lock();
        if let Some(last) = guard.session.conversation.last() {
            if turn.created_at < last.created_at {
                turn.created_at = last.created_at;
            }
        }
        guard.session.conversation.push(turn);
        guard.session.conversation.len()
    }

    /// Append a fetched artifact, then evict oldest entries of that kind
    /// until both the count bound and the total-character bound hold.
    pub fn add_artifact(&self, session_id: &str, kind: SourceKind, mut artifact: Artifact) {
        // A single oversized artifact is truncated so the bound always holds.
        if artifact.content.chars().count() > self.artifact_max_chars {
            artifact.content = artifact
                .content
                .chars()
                .take(self.artifact_max_chars)
                .collect();
        }

        let slot = self.slot(session_id);
        let mut guard = slot.lock();
        let seq = guard.session.fetched_context.entry(kind).or_default();
        seq.push(artifact);

        while seq.len() > self.artifact_max_count
            || seq.iter().map(|a| a.content.chars().count()).sum::<usize>()
                > self.artifact_max_chars
        {
            seq.remove(0);
        }
    }

    /// Update the session's cached system prompt.
    pub fn set_system_prompt(&self, session_id: &str, prompt: String) {
        let slot = self.slot(session_id);
        slot.lock().session.system_prompt = prompt;
    }

    /// Mutate the session metadata in place.
    pub fn update_metadata(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut crate::types::SessionMetadata),
    ) {
        let slot = self.slot(session_id);
        f(&mut slot.lock().session.metadata);
    }

    /// Whether the session holds at least one artifact of the given kind.
    pub fn has_artifacts(&self, session_id: &str, kind: SourceKind) -> bool {
        let slot = self.slot(session_id);
        let guard = slot.lock();
        guard
            .session
            .fetched_context
            .get(&kind)
            .is_some_and(|seq| !seq.is_empty())
    }

    /// The most recent artifact of a kind, if any.
    pub fn latest_artifact(&self, session_id: &str, kind: SourceKind) -> Option<Artifact> {
        let slot = self.slot(session_id);
        let guard = slot.lock();
        guard
            .session
            .fetched_context
            .get(&kind)
            .and_then(|seq| seq.last().cloned())
    }

    /// Every distinct origin URL currently held in the session's artifacts.
    pub fn source_urls(&self, session_id: &str) -> Vec<String> {
        let slot = self.slot(session_id);
        let guard = slot.lock();
        let mut seen = std::collections::HashSet::new();
        let mut urls = Vec::new();
        for kind in SourceKind::ALL {
            if let Some(seq) = guard.session.fetched_context.get(&kind) {
                for artifact in seq {
                    if let Some(url) = &artifact.origin_url {
                        if seen.insert(url.clone()) {
                            urls.push(url.clone());
                        }
                    }
                }
            }
        }
        urls
    }

    /// Materialize the session into the message list handed to the LLM.
    ///
    /// Order: the assembled system message; one message per non-empty
    /// SourceKind carrying that kind's marker prefix; then the conversation
    /// turns in order, each prefixed with its role marker.
    pub fn render_for_llm(&self, session_id: &str) -> Vec<Message> {
        let slot = self.slot(session_id);
        let guard = slot.lock();
        let session = &guard.session;

        let mut messages = Vec::new();
        messages.push(Message::system(session.system_prompt.clone()));

        for kind in SourceKind::ALL {
            let Some(seq) = session.fetched_context.get(&kind) else {
                continue;
            };
            if seq.is_empty() {
                continue;
            }
            let joined = seq
                .iter()
                .map(|a| a.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            messages.push(Message::user(format!("{}{}", kind.marker(), joined)));
        }

        for turn in &session.conversation {
            let prefix = match turn.role {
                TurnRole::User => "[USER MESSAGE]: ",
                TurnRole::Assistant => "[ASSISTANT MESSAGE]: ",
            };
            let text = format!("{prefix}{}", turn.content);
            messages.push(match turn.role {
                TurnRole::User => Message::user(text),
                TurnRole::Assistant => Message::assistant(text),
            });
        }

        messages
    }

    /// Wipe the session. `preserve_fetched` keeps the artifact sequences
    /// and clears only the conversation.
    pub fn clear(&self, session_id: &str, preserve_fetched: bool) {
        let slot = self.slot(session_id);
        let mut guard = slot.lock();
        guard.session.conversation.clear();
        if !preserve_fetched {
            guard.session.fetched_context.clear();
        }
    }

    /// Current counters for the session.
    pub fn stats(&self, session_id: &str) -> SessionStats {
        let slot = self.slot(session_id);
        let guard = slot.lock();
        let session = &guard.session;

        let mut total_chars = session.system_prompt.chars().count();
        let mut artifact_counts = HashMap::new();
        for (kind, seq) in &session.fetched_context {
            total_chars += seq.iter().map(|a| a.content.chars().count()).sum::<usize>();
            let key = serde_json::to_value(kind)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            artifact_counts.insert(key, seq.len());
        }
        total_chars += session
            .conversation
            .iter()
            .map(|t| t.content.chars().count())
            .sum::<usize>();

        SessionStats {
            turn_count: session.conversation.len(),
            approx_tokens: total_chars.div_ceil(4),
            artifact_counts_by_kind: artifact_counts,
        }
    }

    /// A point-in-time copy of the session record.
    pub fn snapshot(&self, session_id: &str) -> Session {
        let slot = self.slot(session_id);
        let guard = slot.lock();
        guard.session.clone()
    }

    /// Drop sessions idle past the TTL. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|_, slot| slot.lock().last_touched.elapsed() < self.ttl);
        before - slots.len()
    }

    /// Number of live sessions (for the memory-stats endpoint).
    pub fn session_count(&self) -> usize {
        self.slots.read().len()
    }

    /// Total characters held across all sessions (debug accounting).
    pub fn total_chars(&self) -> usize {
        let slots = self.slots.read();
        slots
            .values()
            .map(|slot| {
                let guard = slot.lock();
                let s = &guard.session;
                s.system_prompt.chars().count()
                    + s.conversation
                        .iter()
                        .map(|t| t.content.chars().count())
                        .sum::<usize>()
                    + s.fetched_context
                        .values()
                        .flat_map(|seq| seq.iter().map(|a| a.content.chars().count()))
                        .sum::<usize>()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(&SessionsConfig::default())
    }

    fn small_store() -> SessionStore {
        SessionStore::new(&SessionsConfig {
            ttl_secs: 3_600,
            artifact_max_count: 3,
            artifact_max_chars: 20,
        })
    }

    #[test]
    fn turn_count_tracks_appends() {
        let store = store();
        assert_eq!(store.append_turn("s1", Turn::user("q1")), 1);
        assert_eq!(store.append_turn("s1", Turn::assistant("a1")), 2);
        assert_eq!(store.stats("s1").turn_count, 2);
    }

    #[test]
    fn turn_timestamps_are_monotone() {
        let store = store();
        let mut early = Turn::user("later message, earlier clock");
        early.created_at = Utc::now() - chrono::Duration::hours(1);
        store.append_turn("s1", Turn::user("first"));
        store.append_turn("s1", early);
        let session = store.snapshot("s1");
        assert!(session.conversation[1].created_at >= session.conversation[0].created_at);
    }

    #[test]
    fn artifact_count_bound_drops_oldest() {
        let store = small_store();
        for i in 0..5 {
            store.add_artifact("s1", SourceKind::WebSearch, Artifact::new(format!("r{i}")));
        }
        let session = store.snapshot("s1");
        let seq = &session.fetched_context[&SourceKind::WebSearch];
        assert_eq!(seq.len(), 3);
        assert_eq!(seq[0].content, "r2");
        assert_eq!(seq[2].content, "r4");
    }

    #[test]
    fn artifact_char_bound_drops_oldest() {
        let store = small_store();
        store.add_artifact("s1", SourceKind::ToolOutput, Artifact::new("aaaaaaaaaa")); // 10
        store.add_artifact("s1", SourceKind::ToolOutput, Artifact::new("bbbbbbbbbb")); // 10
        store.add_artifact("s1", SourceKind::ToolOutput, Artifact::new("cc")); // pushes over 20
        let session = store.snapshot("s1");
        let seq = &session.fetched_context[&SourceKind::ToolOutput];
        assert_eq!(seq.len(), 2);
        assert_eq!(seq[0].content, "bbbbbbbbbb");
        assert_eq!(seq[1].content, "cc");
    }

    #[test]
    fn oversized_single_artifact_is_truncated_to_budget() {
        let store = small_store();
        store.add_artifact("s1", SourceKind::PageInjected, Artifact::new("x".repeat(100)));
        let session = store.snapshot("s1");
        let seq = &session.fetched_context[&SourceKind::PageInjected];
        assert_eq!(seq.len(), 1);
        assert_eq!(seq[0].content.len(), 20);
    }

    #[test]
    fn bounds_are_per_kind() {
        let store = small_store();
        for _ in 0..3 {
            store.add_artifact("s1", SourceKind::WebSearch, Artifact::new("w"));
            store.add_artifact("s1", SourceKind::ToolOutput, Artifact::new("t"));
        }
        let stats = store.stats("s1");
        assert_eq!(stats.artifact_counts_by_kind["web_search"], 3);
        assert_eq!(stats.artifact_counts_by_kind["tool_output"], 3);
    }

    #[test]
    fn render_orders_system_context_conversation() {
        let store = store();
        store.set_system_prompt("s1", "identity".into());
        store.add_artifact(
            "s1",
            SourceKind::PageInjected,
            Artifact::new("Apple reported Q4 2024 revenue of $94.9B"),
        );
        store.add_artifact("s1", SourceKind::WebSearch, Artifact::new("search hit"));
        store.append_turn("s1", Turn::user("Summarize this page"));
        store.append_turn("s1", Turn::assistant("Apple grew revenue 8%"));

        let messages = store.render_for_llm("s1");
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].content.text().unwrap(), "identity");
        assert!(messages[1]
            .content
            .text()
            .unwrap()
            .starts_with("[CURRENT PAGE CONTENT - Already scraped, do NOT re-scrape]: "));
        assert!(messages[2]
            .content
            .text()
            .unwrap()
            .starts_with("[WEB SEARCH RESULTS]: "));
        assert!(messages[3]
            .content
            .text()
            .unwrap()
            .starts_with("[USER MESSAGE]: "));
        assert!(messages[4]
            .content
            .text()
            .unwrap()
            .starts_with("[ASSISTANT MESSAGE]: "));
    }

    #[test]
    fn clear_preserving_fetched_keeps_artifacts() {
        let store = store();
        store.append_turn("s1", Turn::user("q"));
        store.add_artifact("s1", SourceKind::WebSearch, Artifact::new("hit"));
        let before = store.stats("s1");

        store.clear("s1", true);
        let after = store.stats("s1");
        assert_eq!(after.turn_count, 0);
        assert_eq!(
            after.artifact_counts_by_kind,
            before.artifact_counts_by_kind
        );
    }

    #[test]
    fn full_clear_zeroes_everything() {
        let store = store();
        store.append_turn("s1", Turn::user("q"));
        store.add_artifact("s1", SourceKind::WebSearch, Artifact::new("hit"));
        store.clear("s1", false);
        let stats = store.stats("s1");
        assert_eq!(stats.turn_count, 0);
        assert!(stats.artifact_counts_by_kind.is_empty());
    }

    #[test]
    fn approx_tokens_is_quarter_of_chars_rounded_up() {
        let store = store();
        store.append_turn("s1", Turn::user("abcde")); // 5 chars -> ceil(5/4) = 2
        assert_eq!(store.stats("s1").approx_tokens, 2);
    }

    #[test]
    fn source_urls_deduplicates() {
        let store = store();
        store.add_artifact(
            "s1",
            SourceKind::WebSearch,
            Artifact::with_url("a", "https://example.com/x"),
        );
        store.add_artifact(
            "s1",
            SourceKind::BrowserScrape,
            Artifact::with_url("b", "https://example.com/x"),
        );
        assert_eq!(store.source_urls("s1"), vec!["https://example.com/x"]);
    }

    #[test]
    fn expired_session_starts_fresh() {
        let store = SessionStore::new(&SessionsConfig {
            ttl_secs: 0,
            ..SessionsConfig::default()
        });
        store.append_turn("s1", Turn::user("q"));
        // TTL of zero: the next touch sees an expired slot.
        assert_eq!(store.stats("s1").turn_count, 0);
    }

    #[test]
    fn sweep_removes_idle_sessions() {
        let store = SessionStore::new(&SessionsConfig {
            ttl_secs: 0,
            ..SessionsConfig::default()
        });
        store.touch_or_create("s1");
        store.touch_or_create("s2");
        assert_eq!(store.sweep_expired(), 2);
        assert_eq!(store.session_count(), 0);
    }
}
