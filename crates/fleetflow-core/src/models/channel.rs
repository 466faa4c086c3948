//! Origin-channel routing for outbound notifications.
//!
//! A task remembers where it was dispatched from so progress and completion
//! messages can be replied to the same conversation. Rendering and delivery
//! belong to the `NotificationSender` implementation, not to this crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Telegram,
    Slack,
    Web,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginChannel {
    pub channel: ChannelType,
    pub conversation_id: String,
}

/// A rendered message headed for an origin channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub content: String,
}

impl OutboundMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}
