//! Session memory compaction
//!
//! Keeps a session's `total_tokens` under the configured ceiling by running
//! a staged pipeline over its messages. Each stage re-checks the ceiling
//! before running, so the pipeline stops as soon as the session fits.
//!
//! Compaction is irreversible: once older messages are collapsed into a
//! synthetic summary, their original detail is no longer recoverable from
//! the live session.

use crate::config::CompactionConfig;
use crate::memory::session::Session;
use crate::message::{Message, Role};
use crate::tokenizer::TokenCounter;
use chrono::Utc;
use metrics::{histogram, increment_counter};
use regex::Regex;
use std::collections::HashSet;

/// Staged compaction pipeline for over-budget sessions
#[derive(Debug, Clone)]
pub struct MemoryOptimizer {
    ceiling: usize,
    retain_recent: usize,
    hard_cap: usize,
    hard_cap_keep: usize,
}

impl MemoryOptimizer {
    /// Creates an optimizer for the given token ceiling
    pub fn new(ceiling: usize, compaction: &CompactionConfig) -> Self {
        Self {
            ceiling,
            retain_recent: compaction.retain_recent,
            hard_cap: compaction.hard_cap,
            hard_cap_keep: compaction.hard_cap_keep,
        }
    }

    /// The per-session token ceiling this optimizer enforces
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Runs the pipeline if the session exceeds the ceiling
    ///
    /// Stages, in order: prefix summarization, redundant-content trim,
    /// prompt-instruction trim (system messages only), hard message cap.
    /// Returns `true` if the session was modified.
    pub fn optimize(&self, session: &mut Session, counter: &TokenCounter) -> bool {
        if session.total_tokens <= self.ceiling {
            return false;
        }

        let before = session.total_tokens;

        let mut changed = self.summarize_prefix(session, counter);
        if session.total_tokens > self.ceiling {
            changed |= self.trim_redundant_lines(session, counter);
        }
        if session.total_tokens > self.ceiling {
            changed |= self.trim_prompt_markup(session, counter);
        }
        if session.total_tokens > self.ceiling {
            changed |= self.enforce_hard_cap(session);
        }
        if !changed {
            return false;
        }

        session.last_updated = Utc::now();

        let reclaimed = before.saturating_sub(session.total_tokens);
        increment_counter!("memory_compactions_total");
        histogram!("memory_compaction_tokens_reclaimed", reclaimed as f64);
        tracing::debug!(
            session_id = %session.session_id,
            before_tokens = before,
            after_tokens = session.total_tokens,
            "compacted session memory"
        );

        true
    }

    /// Stage 1: collapse all but the most recent messages into a summary
    ///
    /// A leading system message is left in place. The collapsed range is
    /// replaced by one synthetic system message recording how many messages
    /// were folded away and the time range they covered.
    fn summarize_prefix(&self, session: &mut Session, counter: &TokenCounter) -> bool {
        let lead = usize::from(
            session
                .messages
                .first()
                .map(|m| m.role == Role::System)
                .unwrap_or(false),
        );
        let len = session.messages.len();
        if len.saturating_sub(lead) <= self.retain_recent {
            return false;
        }

        let cut = len - self.retain_recent;
        let collapsed: Vec<Message> = session.messages.drain(lead..cut).collect();
        let first_seen = collapsed
            .first()
            .map(|m| m.timestamp)
            .unwrap_or_else(Utc::now);
        let last_seen = collapsed
            .last()
            .map(|m| m.timestamp)
            .unwrap_or_else(Utc::now);

        let content = format!(
            "[summary] Collapsed {} earlier messages spanning {} to {}.",
            collapsed.len(),
            first_seen.format("%Y-%m-%d %H:%M"),
            last_seen.format("%Y-%m-%d %H:%M"),
        );
        let (tokens, approximate) = counter.measure(&content);
        let mut summary = Message::new(Role::System, content, tokens);
        summary.metadata.approximate = approximate;
        summary.metadata.compacted_from = Some(collapsed.len());

        session.messages.insert(lead, summary);
        session.recount_tokens();
        tracing::debug!(
            session_id = %session.session_id,
            collapsed = collapsed.len(),
            "summarized message prefix"
        );
        true
    }

    /// Stage 2: normalize whitespace and drop exact duplicate lines
    ///
    /// Short lines and structured lines (list items, headings, emphasized
    /// labels) are spared, since repeating them is usually intentional.
    fn trim_redundant_lines(&self, session: &mut Session, counter: &TokenCounter) -> bool {
        let mut changed = false;
        for message in &mut session.messages {
            let trimmed = dedupe_lines(&message.content);
            if trimmed != message.content {
                let (tokens, approximate) = counter.measure(&trimmed);
                message.content = trimmed;
                message.token_count = tokens;
                message.metadata.approximate |= approximate;
                changed = true;
            }
        }
        session.recount_tokens();
        changed
    }

    /// Stage 3: strip demonstration blocks and markup from system prompts
    fn trim_prompt_markup(&self, session: &mut Session, counter: &TokenCounter) -> bool {
        let example_block = Regex::new(r"(?is)<example>.*?</example>").expect("valid pattern");
        let example_para = Regex::new(r"(?s)Example:.*?(?:\n\n|\z)").expect("valid pattern");
        let stars = Regex::new(r"\*{2,}").expect("valid pattern");
        let hashes = Regex::new(r"#{3,}").expect("valid pattern");

        let mut changed = false;
        for message in &mut session.messages {
            if message.role != Role::System {
                continue;
            }
            let mut content = example_block.replace_all(&message.content, "").into_owned();
            content = example_para.replace_all(&content, "").into_owned();
            content = stars.replace_all(&content, "**").into_owned();
            content = hashes.replace_all(&content, "###").into_owned();

            if content != message.content {
                let (tokens, approximate) = counter.measure(&content);
                message.content = content;
                message.token_count = tokens;
                message.metadata.approximate |= approximate;
                changed = true;
            }
        }
        session.recount_tokens();
        changed
    }

    /// Stage 4: cap the non-system message count outright
    ///
    /// When the earlier stages were not enough and the session still holds
    /// more than `hard_cap` non-system messages, only the most recent
    /// `hard_cap_keep` survive. System messages are kept.
    fn enforce_hard_cap(&self, session: &mut Session) -> bool {
        let non_system = session
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .count();
        if non_system <= self.hard_cap {
            return false;
        }

        let mut keep = vec![false; session.messages.len()];
        let mut kept_recent = 0;
        for (idx, message) in session.messages.iter().enumerate().rev() {
            if message.role == Role::System {
                keep[idx] = true;
            } else if kept_recent < self.hard_cap_keep {
                keep[idx] = true;
                kept_recent += 1;
            }
        }

        let dropped = session.messages.len() - keep.iter().filter(|k| **k).count();
        let mut kept = Vec::with_capacity(session.messages.len() - dropped);
        for (idx, message) in session.messages.drain(..).enumerate() {
            if keep[idx] {
                kept.push(message);
            }
        }
        session.messages = kept;
        session.recount_tokens();
        tracing::debug!(
            session_id = %session.session_id,
            dropped,
            "hard cap dropped oldest messages"
        );
        true
    }
}

/// Structured lines are spared from duplicate dropping
fn is_structured_line(line: &str) -> bool {
    let list_marker = Regex::new(r"^\s*(?:[-*]\s|\*\*|#|\d+[.)]\s)").expect("valid pattern");
    list_marker.is_match(line)
}

/// Normalizes intra-line whitespace and drops repeated long prose lines
fn dedupe_lines(content: &str) -> String {
    let ws = Regex::new(r"[ \t]+").expect("valid pattern");
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept: Vec<String> = Vec::new();

    for raw in content.lines() {
        let line = ws.replace_all(raw.trim_end(), " ").into_owned();
        let first_occurrence = seen.insert(line.clone());
        if first_occurrence || line.chars().count() < 20 || is_structured_line(&line) {
            kept.push(line);
        }
    }

    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::session::SessionMetadata;

    fn optimizer(ceiling: usize) -> MemoryOptimizer {
        MemoryOptimizer::new(ceiling, &CompactionConfig::default())
    }

    fn session_with(messages: Vec<Message>) -> Session {
        let mut session = Session::new("test", None, SessionMetadata::default());
        for message in messages {
            session.push_message(message);
        }
        session
    }

    #[test]
    fn test_under_ceiling_is_untouched() {
        let mut session = session_with(vec![Message::new(Role::User, "hello", 10)]);
        let changed = optimizer(100).optimize(&mut session, &TokenCounter::default());
        assert!(!changed);
        assert_eq!(session.messages.len(), 1);
    }

    #[test]
    fn test_summarize_prefix_keeps_recent_and_leading_system() {
        let mut messages = vec![Message::new(Role::System, "instructions", 5)];
        for i in 0..30 {
            messages.push(Message::new(Role::User, format!("question {}", i), 100));
            messages.push(Message::new(Role::Assistant, format!("answer {}", i), 100));
        }
        let mut session = session_with(messages);

        let opt = optimizer(2_000);
        let changed = opt.optimize(&mut session, &TokenCounter::default());
        assert!(changed);

        // Leading system message survives, followed by the summary
        assert_eq!(session.messages[0].content, "instructions");
        let summary = &session.messages[1];
        assert_eq!(summary.role, Role::System);
        assert!(summary.content.starts_with("[summary] Collapsed"));
        assert_eq!(summary.metadata.compacted_from, Some(50));

        // Ten retained messages plus system and summary
        assert_eq!(session.messages.len(), 12);
        assert_eq!(session.messages.last().expect("tail").content, "answer 29");
        assert!(session.total_tokens <= 2_000);
    }

    #[test]
    fn test_summary_totals_recounted() {
        let mut session = session_with(
            (0..20)
                .map(|i| Message::new(Role::User, format!("msg {}", i), 50))
                .collect(),
        );
        let opt = optimizer(100);
        opt.optimize(&mut session, &TokenCounter::default());

        let expected: usize = session.messages.iter().map(|m| m.token_count).sum();
        assert_eq!(session.total_tokens, expected);
    }

    #[test]
    fn test_dedupe_lines_drops_long_duplicates() {
        let content = "this is a long repeated prose line here\n\
                       this is a long repeated prose line here\n\
                       short line\n\
                       short line";
        let trimmed = dedupe_lines(content);
        let lines: Vec<&str> = trimmed.lines().collect();
        // Long duplicate dropped, short duplicate spared
        assert_eq!(
            lines,
            vec![
                "this is a long repeated prose line here",
                "short line",
                "short line"
            ]
        );
    }

    #[test]
    fn test_dedupe_lines_spares_structured_lines() {
        let content = "- repeated structured item for the checklist\n\
                       - repeated structured item for the checklist\n\
                       **Bold label repeated over and over again**\n\
                       **Bold label repeated over and over again**";
        let trimmed = dedupe_lines(content);
        assert_eq!(trimmed.lines().count(), 4);
    }

    #[test]
    fn test_dedupe_lines_normalizes_whitespace() {
        assert_eq!(dedupe_lines("a  b\t\tc   "), "a b c");
    }

    #[test]
    fn test_prompt_markup_trim_strips_examples() {
        let prompt = "Classify the incident.\n\n\
                      <example>input: X\noutput: Y</example>\n\
                      Respond with ####Heading and ****emphasis****.";
        let mut session = session_with(vec![
            Message::new(Role::System, prompt, 500),
            Message::new(Role::User, "go", 500),
        ]);

        // Ceiling low enough that stages 2 and 3 both run
        let opt = optimizer(10);
        opt.optimize(&mut session, &TokenCounter::default());

        let system = &session.messages[0];
        assert!(!system.content.contains("<example>"));
        assert!(!system.content.contains("####"));
        assert!(!system.content.contains("****"));
        // Non-system content is not subject to the markup trim
        assert_eq!(session.messages[1].content, "go");
    }

    #[test]
    fn test_hard_cap_keeps_most_recent() {
        let config = CompactionConfig {
            retain_recent: 30,
            hard_cap: 5,
            hard_cap_keep: 3,
        };
        let mut session = session_with(
            (0..10)
                .map(|i| Message::new(Role::User, format!("message number {}", i), 1_000))
                .collect(),
        );
        let opt = MemoryOptimizer::new(10, &config);
        opt.optimize(&mut session, &TokenCounter::default());

        let contents: Vec<&str> = session.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["message number 7", "message number 8", "message number 9"]
        );
    }

    #[test]
    fn test_hard_cap_preserves_system_messages() {
        let config = CompactionConfig {
            retain_recent: 30,
            hard_cap: 4,
            hard_cap_keep: 2,
        };
        let mut messages = vec![Message::new(Role::System, "sys", 10)];
        messages.extend((0..8).map(|i| Message::new(Role::User, format!("user msg {}", i), 1_000)));
        let mut session = session_with(messages);

        MemoryOptimizer::new(10, &config).optimize(&mut session, &TokenCounter::default());

        assert_eq!(session.messages[0].role, Role::System);
        let non_system = session
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .count();
        assert_eq!(non_system, 2);
    }

    #[test]
    fn test_pipeline_terminates_and_converges() {
        // Heavily padded duplicate content gives every stage work to do
        let body = "a repeated long line of incident narrative text\n".repeat(20);
        let mut session = session_with(
            (0..40)
                .map(|i| Message::new(Role::User, format!("{}turn {}", body, i), 300))
                .collect(),
        );
        let before = session.total_tokens;

        let opt = optimizer(500);
        let changed = opt.optimize(&mut session, &TokenCounter::default());

        assert!(changed);
        assert!(session.total_tokens < before);
        // Either the ceiling was reached or every stage has run and the
        // hard cap bounds the message count
        assert!(
            session.total_tokens <= 500
                || session
                    .messages
                    .iter()
                    .filter(|m| m.role != Role::System)
                    .count()
                    <= 10
        );
    }

    #[test]
    fn test_pipeline_stops_once_ceiling_met() {
        // Prefix summarization alone brings this under the ceiling, so the
        // duplicate-heavy recent content must survive untouched.
        let noisy = "duplicate duplicate duplicate duplicate line one\n".repeat(3);
        let mut messages: Vec<Message> = (0..20)
            .map(|i| Message::new(Role::User, format!("old message {}", i), 200))
            .collect();
        for i in 0..10 {
            messages.push(Message::new(Role::User, format!("{}recent {}", noisy, i), 10));
        }
        let mut session = session_with(messages);

        optimizer(500).optimize(&mut session, &TokenCounter::default());

        assert!(session.total_tokens <= 500);
        let tail = session.messages.last().expect("tail");
        assert!(tail.content.contains("duplicate duplicate"));
    }
}
