//! Turning a fetched RFC 5322 message into a [`RawMessage`].

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use mailparse::{addrparse, dateparse, DispositionType, MailAddr, MailHeaderMap, ParsedMail};

use crate::services::mailbox::MailboxError;
use crate::types::{Envelope, RawMessage};

const HTML_WRAP_WIDTH: usize = 100;

pub fn parse_message(
    uid: u32,
    raw: &[u8],
    internal_date: Option<DateTime<FixedOffset>>,
    mailbox: &str,
) -> Result<RawMessage, MailboxError> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| MailboxError::Protocol(format!("UID {} is not a parseable message: {}", uid, e)))?;

    let message_id = parsed
        .headers
        .get_first_value("Message-ID")
        .map(|v| normalize_message_id(&v))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| format!("uid-{}@{}", uid, mailbox));

    let date_header = parsed.headers.get_first_value("Date");

    let received_at = internal_date
        .map(|d| d.with_timezone(&Utc))
        .or_else(|| {
            date_header
                .as_deref()
                .and_then(|d| dateparse(d).ok())
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        })
        .unwrap_or_else(Utc::now);

    let (from_address, from_name) = parsed
        .headers
        .get_first_value("From")
        .and_then(|v| first_address(&v))
        .unwrap_or_default();

    let to_addresses = parsed
        .headers
        .get_first_value("To")
        .map(|v| all_addresses(&v))
        .unwrap_or_default();

    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();

    let headers = parsed
        .headers
        .iter()
        .map(|h| (h.get_key(), h.get_value()))
        .collect();

    let body = extract_body(&parsed);

    Ok(RawMessage {
        uid,
        message_id,
        received_at,
        envelope: Envelope {
            from_address,
            from_name,
            to_addresses,
            subject,
            date: date_header,
        },
        headers,
        body,
    })
}

/// `<abc@host>` -> `abc@host`
pub fn normalize_message_id(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_string()
}

fn first_address(value: &str) -> Option<(String, Option<String>)> {
    let list = addrparse(value).ok()?;
    list.iter().find_map(|addr| match addr {
        MailAddr::Single(info) => Some((info.addr.to_lowercase(), info.display_name.clone())),
        MailAddr::Group(group) => group
            .addrs
            .first()
            .map(|info| (info.addr.to_lowercase(), info.display_name.clone())),
    })
}

fn all_addresses(value: &str) -> Vec<String> {
    let list = match addrparse(value) {
        Ok(list) => list,
        Err(_) => return Vec::new(),
    };
    list.iter()
        .flat_map(|addr| match addr {
            MailAddr::Single(info) => vec![info.addr.to_lowercase()],
            MailAddr::Group(group) => group.addrs.iter().map(|i| i.addr.to_lowercase()).collect(),
        })
        .collect()
}

/// Plain text if the message has any, otherwise HTML rendered as text.
fn extract_body(parsed: &ParsedMail<'_>) -> String {
    if let Some(part) = find_part(parsed, "text/plain") {
        if let Ok(text) = part.get_body() {
            return text;
        }
    }

    if let Some(part) = find_part(parsed, "text/html") {
        if let Ok(html) = part.get_body() {
            return html2text::from_read(html.as_bytes(), HTML_WRAP_WIDTH).unwrap_or(html);
        }
    }

    String::new()
}

fn find_part<'a>(part: &'a ParsedMail<'a>, mimetype: &str) -> Option<&'a ParsedMail<'a>> {
    if part.subparts.is_empty() {
        let is_attachment = matches!(
            part.get_content_disposition().disposition,
            DispositionType::Attachment
        );
        if !is_attachment && part.ctype.mimetype.eq_ignore_ascii_case(mimetype) {
            return Some(part);
        }
        return None;
    }
    part.subparts.iter().find_map(|sub| find_part(sub, mimetype))
}
