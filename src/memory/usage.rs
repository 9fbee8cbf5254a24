//! Usage analytics and optimization suggestions
//!
//! Aggregates token, cost, and cache statistics across live sessions and
//! turns them into prioritized suggestions for reducing upstream spend.

use serde::{Deserialize, Serialize};

/// Aggregated token and cost statistics across live sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Sum of all message token counts
    pub total_tokens: usize,
    /// Tokens from non-model-authored messages
    pub input_tokens: usize,
    /// Tokens from model-authored messages
    pub output_tokens: usize,
    /// Sum of session costs in USD
    pub total_cost: f64,
    /// Cache lookups answered from the cache
    pub cache_hits: u64,
    /// Cache lookups that fell through
    pub cache_misses: u64,
    /// Hits as a percentage of all lookups
    pub cache_hit_rate: f64,
    /// Number of live sessions
    pub session_count: usize,
    /// Mean tokens per live session
    pub average_tokens_per_session: f64,
}

impl UsageStats {
    /// Fills in the derived rate and average fields
    pub fn finalize(mut self) -> Self {
        let lookups = self.cache_hits + self.cache_misses;
        self.cache_hit_rate = if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64 * 100.0
        };
        self.average_tokens_per_session = if self.session_count == 0 {
            0.0
        } else {
            self.total_tokens as f64 / self.session_count as f64
        };
        self
    }
}

/// Urgency of an optimization suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// A single cost-reduction suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Area the suggestion concerns
    pub category: String,
    /// Human-readable recommendation
    pub detail: String,
    /// Estimated token savings if applied
    pub potential_token_savings: usize,
    /// Estimated cost savings in USD if applied
    pub potential_cost_savings: f64,
    /// Urgency
    pub priority: Priority,
}

/// Derives optimization suggestions from aggregated usage
///
/// Thresholds and savings factors follow observed usage patterns: heavy
/// per-session histories respond well to compaction (~30% reclaim), poor
/// cache utilization leaves roughly 15% of tokens on the table, and a high
/// output-to-input ratio usually means prompts invite verbose replies.
pub fn suggestions_for(stats: &UsageStats) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();

    if stats.average_tokens_per_session > 20_000.0 {
        suggestions.push(Suggestion {
            category: "Session Management".to_string(),
            detail: "Sessions carry large histories. Lower the compaction ceiling or \
                     shorten the history window sent upstream."
                .to_string(),
            potential_token_savings: (stats.average_tokens_per_session * 0.3) as usize,
            potential_cost_savings: stats.total_cost * 0.3,
            priority: Priority::High,
        });
    }

    if stats.cache_hits + stats.cache_misses > 0 && stats.cache_hit_rate < 20.0 {
        suggestions.push(Suggestion {
            category: "Caching".to_string(),
            detail: "Low cache hit rate. Widen the cache TTL or normalize analysis \
                     inputs so repeated requests share a key."
                .to_string(),
            potential_token_savings: (stats.total_tokens as f64 * 0.15) as usize,
            potential_cost_savings: stats.total_cost * 0.15,
            priority: Priority::High,
        });
    }

    if stats.input_tokens > 0 && stats.output_tokens as f64 / stats.input_tokens as f64 > 0.5 {
        suggestions.push(Suggestion {
            category: "Prompt Engineering".to_string(),
            detail: "High output-to-input token ratio. Tighten prompts to request \
                     more concise responses."
                .to_string(),
            potential_token_savings: (stats.output_tokens as f64 * 0.2) as usize,
            potential_cost_savings: stats.total_cost * 0.2,
            priority: Priority::Medium,
        });
    }

    if stats.session_count > 50 {
        suggestions.push(Suggestion {
            category: "Session Cleanup".to_string(),
            detail: "Many live sessions. Run the idle-session sweep more often."
                .to_string(),
            potential_token_savings: (stats.total_tokens as f64 * 0.1) as usize,
            potential_cost_savings: stats.total_cost * 0.1,
            priority: Priority::Medium,
        });
    }

    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_computes_hit_rate() {
        let stats = UsageStats {
            cache_hits: 3,
            cache_misses: 1,
            ..Default::default()
        }
        .finalize();
        assert_eq!(stats.cache_hit_rate, 75.0);
    }

    #[test]
    fn test_finalize_handles_zero_lookups_and_sessions() {
        let stats = UsageStats::default().finalize();
        assert_eq!(stats.cache_hit_rate, 0.0);
        assert_eq!(stats.average_tokens_per_session, 0.0);
    }

    #[test]
    fn test_finalize_computes_average_tokens() {
        let stats = UsageStats {
            total_tokens: 9_000,
            session_count: 3,
            ..Default::default()
        }
        .finalize();
        assert_eq!(stats.average_tokens_per_session, 3_000.0);
    }

    #[test]
    fn test_quiet_usage_yields_no_suggestions() {
        let stats = UsageStats {
            total_tokens: 1_000,
            input_tokens: 800,
            output_tokens: 200,
            total_cost: 0.01,
            cache_hits: 8,
            cache_misses: 2,
            session_count: 2,
            ..Default::default()
        }
        .finalize();
        assert!(suggestions_for(&stats).is_empty());
    }

    #[test]
    fn test_heavy_sessions_flagged_high_priority() {
        let stats = UsageStats {
            total_tokens: 100_000,
            input_tokens: 90_000,
            output_tokens: 10_000,
            total_cost: 1.0,
            session_count: 2,
            ..Default::default()
        }
        .finalize();
        let suggestions = suggestions_for(&stats);
        let session = suggestions
            .iter()
            .find(|s| s.category == "Session Management")
            .expect("session suggestion");
        assert_eq!(session.priority, Priority::High);
        assert_eq!(session.potential_token_savings, 15_000);
    }

    #[test]
    fn test_low_hit_rate_flagged() {
        let stats = UsageStats {
            total_tokens: 10_000,
            input_tokens: 9_000,
            output_tokens: 1_000,
            cache_hits: 1,
            cache_misses: 9,
            session_count: 5,
            ..Default::default()
        }
        .finalize();
        assert!(suggestions_for(&stats)
            .iter()
            .any(|s| s.category == "Caching"));
    }

    #[test]
    fn test_no_cache_traffic_is_not_flagged() {
        let stats = UsageStats {
            total_tokens: 10_000,
            input_tokens: 9_000,
            output_tokens: 1_000,
            session_count: 5,
            ..Default::default()
        }
        .finalize();
        assert!(!suggestions_for(&stats)
            .iter()
            .any(|s| s.category == "Caching"));
    }

    #[test]
    fn test_verbose_output_flagged_medium() {
        let stats = UsageStats {
            total_tokens: 10_000,
            input_tokens: 4_000,
            output_tokens: 6_000,
            cache_hits: 5,
            cache_misses: 5,
            session_count: 1,
            ..Default::default()
        }
        .finalize();
        let suggestions = suggestions_for(&stats);
        let prompt = suggestions
            .iter()
            .find(|s| s.category == "Prompt Engineering")
            .expect("prompt suggestion");
        assert_eq!(prompt.priority, Priority::Medium);
    }

    #[test]
    fn test_session_sprawl_flagged() {
        let stats = UsageStats {
            total_tokens: 5_000,
            input_tokens: 4_000,
            output_tokens: 1_000,
            cache_hits: 10,
            cache_misses: 1,
            session_count: 60,
            ..Default::default()
        }
        .finalize();
        assert!(suggestions_for(&stats)
            .iter()
            .any(|s| s.category == "Session Cleanup"));
    }
}
