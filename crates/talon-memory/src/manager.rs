//! Context assembly, turn ingest, decay sweep.

use std::sync::Arc;

use tracing::{debug, info};

use talon_store::error::Result;
use talon_store::{MemorySector, Role, Store};

use crate::extract::extract_facts;

/// Hard cap on memory rows per chat; ingest prunes past this.
pub const MAX_MEMORIES_PER_CHAT: usize = 200;
/// Conversation log rows kept per chat by the sweep.
pub const CONVERSATION_KEEP: usize = 500;

const MAX_EPISODIC_CHARS: usize = 500;
const MAX_SEMANTIC_CHARS: usize = 300;
const SEARCH_LIMIT: usize = 3;
const RECENT_LIMIT: usize = 5;
const TOUCH_DELTA: f64 = 0.1;
/// User messages at or below this length are not worth remembering.
const MIN_EPISODIC_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, Default)]
pub struct SweepStats {
    pub decayed: usize,
    pub deleted: usize,
    pub pruned_log: usize,
}

pub struct MemoryCore {
    store: Arc<Store>,
}

impl MemoryCore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Assemble the `<memory-context>` block for a turn.
    ///
    /// Relevant = top-3 full-text hits for the user message; Recent = top-5
    /// by last access, minus anything already in Relevant. Surfacing a
    /// relevant memory touches it (+0.1 salience); that is the only mutation here.
    pub fn build_context(&self, chat_id: i64, user_msg: &str, now: i64) -> Result<String> {
        let hits = self.store.search_memories(chat_id, user_msg, SEARCH_LIMIT)?;
        let recent = self.store.recent_memories(chat_id, RECENT_LIMIT)?;
        let recent: Vec<_> = recent
            .into_iter()
            .filter(|r| !hits.iter().any(|h| h.id == r.id))
            .collect();

        for hit in &hits {
            self.store.touch_memory(hit.id, TOUCH_DELTA, now)?;
        }

        if hits.is_empty() && recent.is_empty() {
            return Ok(String::new());
        }

        let mut out = String::from("<memory-context>\n");
        if !hits.is_empty() {
            out.push_str("## Relevant Memories\n");
            for m in &hits {
                out.push_str(&format!("- [{}] {}\n", m.sector, m.content));
            }
        }
        if !recent.is_empty() {
            if !hits.is_empty() {
                out.push('\n');
            }
            out.push_str("## Recent Memories\n");
            for m in &recent {
                out.push_str(&format!("- [{}] {}\n", m.sector, m.content));
            }
        }
        out.push_str("</memory-context>");
        Ok(out)
    }

    /// Persist a finished turn: both log sides, an episodic memory for
    /// substantial user messages, semantic facts mined from the reply, then
    /// prune anything beyond the per-chat cap.
    pub fn record_turn(
        &self,
        chat_id: i64,
        user_msg: &str,
        reply: &str,
        session_id: Option<&str>,
        now: i64,
    ) -> Result<()> {
        self.store
            .append_conversation(chat_id, session_id, Role::User, user_msg, now)?;
        self.store
            .append_conversation(chat_id, session_id, Role::Assistant, reply, now)?;

        if user_msg.chars().count() > MIN_EPISODIC_CHARS && !user_msg.starts_with('/') {
            self.store.insert_memory(
                chat_id,
                None,
                MemorySector::Episodic,
                &truncate_chars(user_msg, MAX_EPISODIC_CHARS),
                now,
            )?;
        }

        for fact in extract_facts(reply) {
            self.store.insert_memory(
                chat_id,
                None,
                MemorySector::Semantic,
                &truncate_chars(&fact, MAX_SEMANTIC_CHARS),
                now,
            )?;
        }

        let pruned = self.store.prune_memories(chat_id, MAX_MEMORIES_PER_CHAT)?;
        if pruned > 0 {
            debug!(chat_id, pruned, "memory cap enforced");
        }
        Ok(())
    }

    /// Hourly maintenance: salience decay plus conversation-log pruning.
    pub fn decay_sweep(&self, now: i64) -> Result<SweepStats> {
        let (decayed, deleted) = self.store.decay_memories(now)?;
        let pruned_log = self.store.prune_conversations(CONVERSATION_KEEP)?;
        info!(decayed, deleted, pruned_log, "memory decay sweep complete");
        Ok(SweepStats {
            decayed,
            deleted,
            pruned_log,
        })
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> MemoryCore {
        MemoryCore::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    #[test]
    fn context_is_empty_for_a_fresh_chat() {
        let m = core();
        assert_eq!(m.build_context(1, "anything here", 100).unwrap(), "");
    }

    #[test]
    fn context_lists_relevant_then_recent_without_duplicates() {
        let m = core();
        let s = &m.store;
        s.insert_memory_at(1, None, MemorySector::Semantic, "prefers oat milk coffee", 100, 100)
            .unwrap();
        s.insert_memory_at(1, None, MemorySector::Episodic, "asked about the Berlin office", 100, 200)
            .unwrap();

        let ctx = m.build_context(1, "coffee order", 300).unwrap();
        assert!(ctx.starts_with("<memory-context>"));
        assert!(ctx.ends_with("</memory-context>"));
        let relevant = ctx.find("## Relevant Memories").unwrap();
        let recent = ctx.find("## Recent Memories").unwrap();
        assert!(relevant < recent);
        // The coffee row is relevant and must not repeat under recent.
        assert_eq!(ctx.matches("oat milk").count(), 1);
        assert!(ctx.contains("- [semantic] prefers oat milk coffee"));
        assert!(ctx.contains("- [episodic] asked about the Berlin office"));
    }

    #[test]
    fn surfacing_touches_relevant_memories_only() {
        let m = core();
        let s = &m.store;
        let hit = s
            .insert_memory_at(1, None, MemorySector::Semantic, "birthday in October", 100, 100)
            .unwrap();
        let bystander = s
            .insert_memory_at(1, None, MemorySector::Episodic, "weekend plans pending", 100, 100)
            .unwrap();

        m.build_context(1, "october birthday", 900).unwrap();

        let all = s.recent_memories(1, 10).unwrap();
        let touched = all.iter().find(|e| e.id == hit).unwrap();
        let untouched = all.iter().find(|e| e.id == bystander).unwrap();
        assert!(touched.salience > 1.0);
        assert_eq!(touched.accessed_at, 900);
        assert!((untouched.salience - 1.0).abs() < 1e-9);
    }

    #[test]
    fn record_turn_appends_both_log_sides() {
        let m = core();
        m.record_turn(1, "how's the weather", "Mild with light rain tomorrow.", Some("s1"), 100)
            .unwrap();
        let log = m.store.recent_conversations(1, 10).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].role, Role::User);
        assert_eq!(log[1].role, Role::Assistant);
        assert_eq!(log[0].session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn short_and_command_messages_are_not_memorised() {
        let m = core();
        m.record_turn(1, "ok thanks", "Sure.", None, 100).unwrap();
        m.record_turn(1, "/status but phrased as a longer command line", "Done.", None, 100)
            .unwrap();
        assert_eq!(m.store.memory_count(1).unwrap(), 0);
    }

    #[test]
    fn substantial_user_message_becomes_episodic_memory() {
        let m = core();
        m.record_turn(1, "please plan the two-week Portugal trip in September", "Will do.", None, 100)
            .unwrap();
        let rows = m.store.recent_memories(1, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sector, MemorySector::Episodic);
    }

    #[test]
    fn facts_in_reply_become_semantic_memories() {
        let m = core();
        m.record_turn(
            1,
            "noted preferences for future bookings please",
            "Understood.\nRemember: aisle seats only on short flights",
            None,
            100,
        )
        .unwrap();
        let semantic: Vec<_> = m
            .store
            .recent_memories(1, 10)
            .unwrap()
            .into_iter()
            .filter(|e| e.sector == MemorySector::Semantic)
            .collect();
        assert_eq!(semantic.len(), 1);
        assert_eq!(semantic[0].content, "aisle seats only on short flights");
    }

    #[test]
    fn ingest_enforces_the_per_chat_cap() {
        let m = core();
        let s = &m.store;
        for i in 0..MAX_MEMORIES_PER_CHAT {
            s.insert_memory_at(
                1,
                None,
                MemorySector::Episodic,
                &format!("old memory number {i}"),
                100,
                100 + i as i64,
            )
            .unwrap();
        }
        // Find the designated victim: lowest salience, oldest access.
        let victim = s
            .recent_memories(1, MAX_MEMORIES_PER_CHAT)
            .unwrap()
            .last()
            .unwrap()
            .id;

        m.record_turn(1, "a brand new message that is long enough to store", "ok", None, 900)
            .unwrap();

        assert_eq!(s.memory_count(1).unwrap(), MAX_MEMORIES_PER_CHAT as i64);
        let ids: Vec<i64> = s
            .recent_memories(1, MAX_MEMORIES_PER_CHAT)
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert!(!ids.contains(&victim));
    }

    #[test]
    fn sweep_prunes_conversation_log() {
        let m = core();
        for i in 0..(CONVERSATION_KEEP + 10) {
            m.store
                .append_conversation(1, None, Role::User, &format!("m{i}"), i as i64)
                .unwrap();
        }
        let stats = m.decay_sweep(10 * 86_400).unwrap();
        assert_eq!(stats.pruned_log, 10);
        assert_eq!(m.store.conversation_count(1).unwrap(), CONVERSATION_KEEP as i64);
    }
}
