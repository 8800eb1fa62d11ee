use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope fields of a fetched message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub from_address: String,
    pub from_name: Option<String>,
    pub to_addresses: Vec<String>,
    pub subject: String,
    /// Date header as sent, kept verbatim for display
    pub date: Option<String>,
}

/// A message as retrieved from the mailbox, before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub uid: u32,
    /// RFC 5322 Message-ID without angle brackets
    pub message_id: String,
    pub received_at: DateTime<Utc>,
    pub envelope: Envelope,
    pub headers: Vec<(String, String)>,
    /// Plain-text body (HTML converted to text when no text part exists)
    pub body: String,
}

impl RawMessage {
    /// Short single-line preview of the body.
    pub fn excerpt(&self, max_chars: usize) -> String {
        let collapsed = self.body.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.chars().count() <= max_chars {
            return collapsed;
        }
        let mut cut: String = collapsed.chars().take(max_chars).collect();
        cut.push('…');
        cut
    }
}

/// Decrypted mailbox login for the duration of one run.
///
/// The password never appears in `Debug` output and the type is neither
/// `Clone` nor serializable.
pub struct MailCredential {
    username: String,
    password: String,
}

impl MailCredential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for MailCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailCredential")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: &str) -> RawMessage {
        RawMessage {
            uid: 1,
            message_id: "m1@example.com".into(),
            received_at: Utc::now(),
            envelope: Envelope {
                from_address: "a@example.com".into(),
                from_name: None,
                to_addresses: vec![],
                subject: "hi".into(),
                date: None,
            },
            headers: vec![],
            body: body.into(),
        }
    }

    #[test]
    fn test_excerpt_collapses_whitespace() {
        let m = message("Hello\n\n  there,\tfriend");
        assert_eq!(m.excerpt(100), "Hello there, friend");
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let m = message("ééééé");
        assert_eq!(m.excerpt(3), "ééé…");
    }
}
