//! Telegram sink — sends messages through the Bot API.
//!
//! Long texts are split to fit Telegram's 4096-char message limit. An
//! HTTP 429 response is mapped to `NotifyError::RateLimited` with the
//! API-supplied `retry_after` so the delivery worker can honor it.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::config::TelegramConfig;
use crate::error::NotifyError;
use crate::notify::Notifier;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Telegram notification sink.
pub struct TelegramNotifier {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token.expose_secret().to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    /// Send a single message chunk (≤4096 chars).
    async fn send_chunk(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body_text = resp.text().await.unwrap_or_default();
        if let Some(retry_after) = retry_after_hint(&body_text) {
            return Err(NotifyError::RateLimited { retry_after });
        }

        Err(NotifyError::Api {
            status: status.as_u16(),
            description: error_description(&body_text),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, channel_id: i64, text: &str) -> Result<(), NotifyError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_chunk(channel_id, &chunk).await?;
        }
        tracing::info!(channel_id, "message sent to telegram");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Extract the retry-after hint from a Bot API error body.
///
/// Checks `parameters.retry_after` first, then falls back to scanning the
/// description for a "retry after N" phrase.
fn retry_after_hint(body: &str) -> Option<Duration> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(secs) = value
            .get("parameters")
            .and_then(|p| p.get("retry_after"))
            .and_then(serde_json::Value::as_u64)
        {
            return Some(Duration::from_secs(secs));
        }
    }

    let re = regex::Regex::new(r"retry after (\d+)").unwrap();
    re.captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .map(Duration::from_secs)
}

/// Pull the human-readable description out of a Bot API error body.
fn error_description(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("description")
                .and_then(serde_json::Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Largest char boundary not exceeding max_len
        let mut cut = max_len;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }

        let window = &remaining[..cut];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .unwrap_or(cut);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { cut } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn test_config() -> TelegramConfig {
        TelegramConfig {
            bot_token: SecretString::from("123:ABC".to_string()),
            default_channel: -1001,
            errors_channel: -1002,
        }
    }

    #[test]
    fn api_url_embeds_token_and_method() {
        let notifier = TelegramNotifier::new(&test_config());
        assert_eq!(
            notifier.api_url("sendMessage"),
            "https://api.telegram.org/bot123:ABC/sendMessage"
        );
    }

    // ── retry-after extraction ──────────────────────────────────────

    #[test]
    fn retry_after_from_parameters() {
        let body = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 23","parameters":{"retry_after":23}}"#;
        assert_eq!(retry_after_hint(body), Some(Duration::from_secs(23)));
    }

    #[test]
    fn retry_after_from_description_text() {
        let body = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 7"}"#;
        assert_eq!(retry_after_hint(body), Some(Duration::from_secs(7)));
    }

    #[test]
    fn no_retry_after_in_ordinary_error() {
        let body = r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#;
        assert_eq!(retry_after_hint(body), None);
    }

    #[test]
    fn retry_after_handles_non_json_body() {
        assert_eq!(
            retry_after_hint("<html>retry after 12</html>"),
            Some(Duration::from_secs(12))
        );
        assert_eq!(retry_after_hint("<html>gateway timeout</html>"), None);
    }

    #[test]
    fn error_description_prefers_api_description() {
        let body = r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#;
        assert_eq!(error_description(body), "Bad Request: chat not found");
    }

    #[test]
    fn error_description_truncates_raw_body() {
        let long = "x".repeat(500);
        assert_eq!(error_description(&long).len(), 200);
    }

    // ── message splitting ───────────────────────────────────────────

    #[test]
    fn split_short_message_passthrough() {
        assert_eq!(split_message("hello", 4096), vec!["hello".to_string()]);
    }

    #[test]
    fn split_prefers_newlines() {
        let text = "first line\nsecond line";
        let chunks = split_message(text, 15);
        assert_eq!(chunks, vec!["first line".to_string(), "second line".to_string()]);
    }

    #[test]
    fn split_hard_cuts_unbroken_text() {
        let text = "a".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn split_respects_char_boundaries() {
        let text = "é".repeat(30); // 2 bytes per char
        let chunks = split_message(&text, 11);
        assert!(chunks.iter().all(|c| c.len() <= 11));
        assert_eq!(chunks.concat(), text);
    }
}
