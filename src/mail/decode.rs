//! MIME decoding — raw RFC 822 bytes to (subject, body) text.
//!
//! Header charset and transfer-encoding normalization is mail-parser's
//! job. A message that cannot be parsed at all is a data-quality problem:
//! the caller logs and drops it without touching dependency health.

use mail_parser::MessageParser;

use crate::mail::RawMessage;

/// A decoded message ready for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMail {
    pub subject: String,
    pub body: String,
}

/// Decode a raw message. Returns `None` when the payload is not parseable
/// as a mail message.
pub fn decode_message(raw: &RawMessage) -> Option<DecodedMail> {
    let parsed = MessageParser::default().parse(raw.data.as_bytes())?;

    let subject = parsed.subject().unwrap_or("(no subject)").to_string();

    let body = if let Some(text) = parsed.body_text(0) {
        text.trim().to_string()
    } else if let Some(html) = parsed.body_html(0) {
        strip_html(html.as_ref())
    } else {
        "(no readable content)".to_string()
    };

    Some(DecodedMail { subject, body })
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    // Normalize whitespace
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
