//! Lead classification over the external AI endpoint.
//!
//! The client builds a bounded prompt from a [`UserAggregate`], sends it through
//! a [`ClassifierEndpoint`] with retry/backoff on transport failures, and reduces
//! the free-form answer to a boolean verdict.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::{
    domain::{format_date, join_groups, join_keywords, ClassificationResult, UserAggregate},
    ports::ClassifierEndpoint,
    retry::RetryPolicy,
    Result,
};

/// Business-fit criteria sent ahead of every user summary.
pub const DEFAULT_INSTRUCTIONS: &str = r#"You are screening Telegram users as potential B2B partners for an iGaming affiliate business.

Decide whether the user below is a relevant business lead. A relevant lead shows one or more of:
1. Traffic arbitrage or media buying (buying/selling traffic, CPA/CPL/CPI deals, RevShare, hybrid deals).
2. Affiliate marketing in gambling, betting, casino, or crypto verticals (affiliate managers, webmasters, networks).
3. Payment processing for high-risk verticals (PSPs, deposits/withdrawals, merchant accounts).
4. Concrete geography or market focus (GEOs, tiers, countries they work with).
5. A professional tone: business offers, partnerships, budgets, volumes, KPIs.

Casual players, people asking for betting tips, spam bots, and off-topic chatter are NOT leads.

Answer with JSON only, no commentary: {"valid": true} or {"valid": false}"#;

/// Representative messages included per prompt.
pub const DEFAULT_MAX_MESSAGES: usize = 5;

const MAX_FIELD_CHARS: usize = 500;

pub struct ClassifierClient {
    endpoint: Arc<dyn ClassifierEndpoint>,
    instructions: String,
    max_messages: usize,
    retry: RetryPolicy,
}

impl ClassifierClient {
    pub fn new(endpoint: Arc<dyn ClassifierEndpoint>) -> Self {
        Self {
            endpoint,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            max_messages: DEFAULT_MAX_MESSAGES,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Instruction template followed by a JSON summary of the user.
    pub fn build_prompt(&self, user: &UserAggregate) -> String {
        let recent: Vec<_> = user
            .messages
            .iter()
            .take(self.max_messages)
            .map(|m| {
                json!({
                    "message_id": m.message_id,
                    "date": format_date(&m.timestamp),
                    "text": truncate_chars(&m.text, MAX_FIELD_CHARS),
                    "gaming_keywords": join_keywords(&m.matched_keywords),
                })
            })
            .collect();

        let summary = json!({
            "sender_username": user.sender_username,
            "sender_name": user.sender_name,
            "sender_bio": truncate_chars(&user.sender_bio, MAX_FIELD_CHARS),
            "sender_common_groups": join_groups(&user.sender_common_groups),
            "group": user.group,
            "group_id": user.group_id,
            "messages_count": user.messages.len(),
            "recent_messages": recent,
        });

        // A json! value always serializes; fall back to compact form just in case.
        let body = serde_json::to_string_pretty(&summary).unwrap_or_else(|_| summary.to_string());
        format!("{}\n\n{body}", self.instructions)
    }

    /// Classify one user.
    ///
    /// Malformed or ambiguous model output is not an error: it yields
    /// `verdict = false` with the raw text kept for audit. `Err` is returned only
    /// when the endpoint keeps failing (after the retry ceiling) or fails permanently.
    pub async fn classify(&self, user: &UserAggregate) -> Result<ClassificationResult> {
        let prompt = self.build_prompt(user);
        let raw = self
            .retry
            .run(&format!("classify {}", user.sender_id), || {
                self.endpoint.complete(&prompt)
            })
            .await?;

        let parsed = parse_verdict(&raw);
        if parsed.is_none() {
            warn!(
                sender_id = %user.sender_id,
                raw = %truncate_chars(&raw, 200),
                "ambiguous classifier output, defaulting to false"
            );
        }

        Ok(ClassificationResult {
            sender_id: user.sender_id.clone(),
            verdict: parsed.unwrap_or(false),
            raw_model_output: raw,
            well_formed: parsed.is_some(),
        })
    }
}

/// Reduce free-form model output to a verdict.
///
/// Accepts a JSON object with a boolean `valid` (optionally wrapped in a
/// markdown code fence) or a bare yes/no/true/false answer. Anything else is
/// ambiguous and yields `None`.
pub fn parse_verdict(raw: &str) -> Option<bool> {
    let cleaned = strip_code_fence(raw);

    if let Ok(v) = serde_json::from_str::<serde_json::Value>(cleaned) {
        return match v {
            serde_json::Value::Object(map) => map.get("valid").and_then(|b| b.as_bool()),
            serde_json::Value::Bool(b) => Some(b),
            _ => None,
        };
    }

    let word = cleaned
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase();
    match word.as_str() {
        "yes" | "true" => Some(true),
        "no" | "false" => Some(false),
        _ => None,
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
