//! Chat notification adapter.
//!
//! Posts a Slack-style message either to an incoming webhook or, when no
//! webhook is configured, to the `chat.postMessage` API with a bearer token.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::NotifyError;

/// Fallback endpoint when no webhook URL is configured.
pub const DEFAULT_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Message to post to a chat channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Channel ID (`C024BE91L`) or name (`#general`).
    pub channel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    /// Overrides `icon_url`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon_emoji: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub icon_url: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub link_names: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
}

impl ChatMessage {
    pub fn new(channel: &str, text: &str) -> Self {
        ChatMessage {
            channel: channel.to_string(),
            text: text.to_string(),
            ..Self::default()
        }
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = username.to_string();
        self
    }

    pub fn with_icon_emoji(mut self, emoji: &str) -> Self {
        self.icon_emoji = emoji.to_string();
        self
    }

    pub fn linking_names(mut self) -> Self {
        self.link_names = true;
        self
    }
}

/// Out-of-band notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post(&self, message: &ChatMessage) -> Result<(), NotifyError>;
}

/// Slack webhook / Web API notifier.
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    webhook_url: Option<String>,
    api_token: Option<String>,
    http: reqwest::Client,
}

impl SlackNotifier {
    /// Blank values count as unset.
    pub fn new(webhook_url: Option<&str>, api_token: Option<&str>) -> Self {
        SlackNotifier {
            webhook_url: non_blank(webhook_url),
            api_token: non_blank(api_token),
            http: reqwest::Client::new(),
        }
    }

    /// Endpoint the message will be posted to.
    pub fn endpoint(&self) -> &str {
        self.webhook_url
            .as_deref()
            .unwrap_or(DEFAULT_POST_MESSAGE_URL)
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn post(&self, message: &ChatMessage) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(message)?;
        debug!(endpoint = %self.endpoint(), body = %String::from_utf8_lossy(&body), "posting chat message");

        let mut request = self
            .http
            .post(self.endpoint())
            .header(reqwest::header::CONTENT_TYPE, "application/json; charset=utf-8")
            .body(body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|err| format!("failed to read response: {err}"));
            return Err(NotifyError::Rejected {
                status: status.to_string(),
                body,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_fields_are_omitted() {
        let json = serde_json::to_value(ChatMessage::new("#ci", "")).unwrap();
        assert_eq!(json, serde_json::json!({ "channel": "#ci" }));
    }

    #[test]
    fn test_full_message_layout() {
        let message = ChatMessage::new("#ci", "build hung")
            .with_username("matrix-trigger")
            .with_icon_emoji(":hourglass:")
            .linking_names();
        let json = serde_json::to_value(message).unwrap();
        assert_eq!(json["text"], "build hung");
        assert_eq!(json["username"], "matrix-trigger");
        assert_eq!(json["icon_emoji"], ":hourglass:");
        assert_eq!(json["link_names"], true);
        assert!(json.get("icon_url").is_none());
    }

    #[test]
    fn test_blank_webhook_falls_back_to_api_endpoint() {
        let notifier = SlackNotifier::new(Some("   "), Some("xoxb-1"));
        assert_eq!(notifier.endpoint(), DEFAULT_POST_MESSAGE_URL);

        let notifier = SlackNotifier::new(Some(" https://hooks.example/T/B/x "), None);
        assert_eq!(notifier.endpoint(), "https://hooks.example/T/B/x");
    }
}
