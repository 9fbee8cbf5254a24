//! Token-bounded history windowing
//!
//! Produces an ordered message slice that fits an upstream call's token
//! budget, without mutating the session. Recent messages win over older
//! ones; a leading system message is reserved off the top of the budget.

use crate::message::{Message, Role};

/// Selects a token-bounded, chronologically ordered slice of `messages`
///
/// Rules:
/// 1. A leading system message is reserved unconditionally and its token
///    count subtracted from the budget. If the budget cannot cover even the
///    system message, the result is empty, signaling the caller to fall
///    back to a fresh minimal prompt.
/// 2. Remaining messages are considered newest first; each one that fits
///    the remaining budget is taken, others are passed over.
/// 3. If no non-system message fits and the budget is positive, the single
///    most recent one is included anyway, accepting the overshoot. A
///    non-empty conversation never windows down to nothing while there is
///    budget to spend.
pub fn window_history(messages: &[Message], max_tokens: usize) -> Vec<Message> {
    if messages.is_empty() {
        return Vec::new();
    }

    let (reserved, rest) = match messages.first() {
        Some(first) if first.role == Role::System => (Some(first), &messages[1..]),
        _ => (None, messages),
    };

    let mut budget = max_tokens;
    if let Some(system) = reserved {
        if system.token_count > budget {
            return Vec::new();
        }
        budget -= system.token_count;
    }

    let mut picked: Vec<&Message> = Vec::new();
    let mut used = 0usize;
    for message in rest.iter().rev() {
        if used + message.token_count > budget {
            continue;
        }
        used += message.token_count;
        picked.push(message);
    }

    if picked.is_empty() && max_tokens > 0 {
        if let Some(latest) = rest.last() {
            picked.push(latest);
        }
    }

    let mut window: Vec<Message> = picked.into_iter().rev().cloned().collect();
    if let Some(system) = reserved {
        window.insert(0, system.clone());
    }
    window
}
