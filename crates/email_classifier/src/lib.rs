//! Briefing categories and decision parsing
//!
//! The generative step is asked to answer with a small JSON object:
//!
//! ```json
//! {"category": "action-needed", "draft_reply": "Thanks, I'll take a look."}
//! ```
//!
//! Models rarely answer with clean JSON, so [`parse_decision`] digs the
//! first object out of the response, tolerates a few spelling variants of
//! the category names and rejects anything outside the closed set.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of categories a processed email can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// The user has to reply or do something
    ActionNeeded,
    /// Worth knowing, nothing to do
    Fyi,
    /// Bulk mail: newsletters, marketing, digests
    Newsletter,
    /// Classification failed after all retries
    Errored,
}

impl Category {
    /// Categories the generative step is allowed to produce.
    pub const ASSIGNABLE: [Category; 3] = [
        Category::ActionNeeded,
        Category::Fyi,
        Category::Newsletter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActionNeeded => "action-needed",
            Self::Fyi => "fyi",
            Self::Newsletter => "newsletter",
            Self::Errored => "errored",
        }
    }

    /// Parse a stored or model-provided label.
    ///
    /// Accepts the canonical kebab-case form plus the usual variations
    /// (`action_needed`, `Action Needed`, `FYI`).
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '_' || c == ' ' { '-' } else { c })
            .collect();

        match normalized.as_str() {
            "action-needed" | "action" | "needs-action" => Some(Self::ActionNeeded),
            "fyi" | "info" | "informational" => Some(Self::Fyi),
            "newsletter" | "bulk" | "marketing" => Some(Self::Newsletter),
            "errored" => Some(Self::Errored),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one classification call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub category: Category,
    pub draft_reply: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no JSON object in model response")]
    NoJson,

    #[error("malformed JSON in model response: {0}")]
    Malformed(String),

    #[error("missing category in model response")]
    MissingCategory,

    #[error("category not in the allowed set: {0}")]
    UnknownCategory(String),
}

// Greedy across lines: models like to wrap the object in prose or fences.
static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{.*\}").expect("static regex")
});

#[derive(Deserialize)]
struct RawDecision {
    category: Option<String>,
    #[serde(default, alias = "draft", alias = "reply", alias = "draftReply")]
    draft_reply: Option<serde_json::Value>,
}

/// Turn a raw model response into a [`Decision`].
pub fn parse_decision(response: &str) -> Result<Decision, ParseError> {
    let object = JSON_OBJECT
        .find(response)
        .map(|m| m.as_str())
        .ok_or(ParseError::NoJson)?;

    let raw: RawDecision =
        serde_json::from_str(object).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let label = raw.category.ok_or(ParseError::MissingCategory)?;
    let category = Category::parse(&label)
        .filter(|c| Category::ASSIGNABLE.contains(c))
        .ok_or_else(|| ParseError::UnknownCategory(label.clone()))?;

    // null, "", "none" and non-string values all mean "no draft"
    let draft_reply = match raw.draft_reply {
        Some(serde_json::Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        _ => None,
    };

    Ok(Decision {
        category,
        draft_reply,
    })
}
