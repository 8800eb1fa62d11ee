//! Ollama-backed classifier and reply drafter.
//!
//! One `/api/generate` call per message with JSON output forced; the answer
//! is parsed by `email_classifier::parse_decision`, which rejects anything
//! outside the assignable categories.

use async_trait::async_trait;
use tracing::debug;

use crate::services::classifier::{ClassifyError, Classifier};
use crate::types::RawMessage;
use email_classifier::{parse_decision, Decision};
use inbox_llm::{GenerateRequest, LlmConfig, OllamaBackend, ResponseFormat};

const BODY_PREVIEW_CHARS: usize = 2000;

const PROMPT: &str = r#"You triage email for a busy person and draft replies when one is needed.

About the user:
{profile}

Classify the email into exactly one category:
- action-needed: the sender expects the user to reply, decide or do something
- fyi: worth knowing, no action required
- newsletter: marketing, digests, mailing lists, automated notifications

If and only if the category is action-needed, write a short, polite reply in
the user's voice. Otherwise leave the draft empty.

Email:
From: {from}
Subject: {subject}
Body:
{body}

Answer with a JSON object and nothing else:
{"category": "action-needed" | "fyi" | "newsletter", "draft_reply": "<reply or empty string>"}"#;

pub struct OllamaClassifier {
    backend: Option<OllamaBackend>,
    model: String,
    temperature: f64,
    max_tokens: Option<u32>,
}

impl OllamaClassifier {
    pub fn new(backend: Option<OllamaBackend>, config: &LlmConfig) -> Self {
        Self {
            backend,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    pub fn build_prompt(message: &RawMessage, profile: &str) -> String {
        let body_preview: String = message.body.chars().take(BODY_PREVIEW_CHARS).collect();
        let from = match &message.envelope.from_name {
            Some(name) if !name.is_empty() => {
                format!("{} <{}>", name, message.envelope.from_address)
            }
            _ => message.envelope.from_address.clone(),
        };
        let subject = if message.envelope.subject.is_empty() {
            "(no subject)"
        } else {
            message.envelope.subject.as_str()
        };
        let profile = if profile.trim().is_empty() {
            "(no profile given)"
        } else {
            profile
        };

        fill_template(
            PROMPT,
            &[
                ("profile", profile),
                ("from", &from),
                ("subject", subject),
                ("body", &body_preview),
            ],
        )
    }
}

/// Substitute `{key}` placeholders in one left-to-right pass. Substituted
/// text is never scanned again, and unknown braces are copied as-is.
fn fill_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after_brace = &rest[start + 1..];

        let matched = vars.iter().find_map(|(key, value)| {
            after_brace
                .strip_prefix(key)?
                .strip_prefix('}')
                .map(|after| (*value, after))
        });

        match matched {
            Some((value, after)) => {
                out.push_str(value);
                rest = after;
            }
            None => {
                out.push('{');
                rest = after_brace;
            }
        }
    }

    out.push_str(rest);
    out
}

#[async_trait]
impl Classifier for OllamaClassifier {
    async fn classify(&self, message: &RawMessage, profile: &str) -> Result<Decision, ClassifyError> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: Self::build_prompt(message, profile),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            format: ResponseFormat::Json,
        };

        let response = inbox_llm::generate(self.backend.as_ref(), &request).await?;
        let decision = parse_decision(&response.text)?;

        debug!(
            message_id = %message.message_id,
            category = %decision.category,
            has_draft = decision.draft_reply.is_some(),
            "Classified message"
        );
        Ok(decision)
    }
}
