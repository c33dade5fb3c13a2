//! Delivery gate and notification formatting.
//!
//! A push is only sent when the recipient has a delivery token and is
//! currently offline. Online users already see the message in the chat UI.

use webglow_common::types::{MediaType, Message, Profile, PushData, PushMessage};

/// Title used when the sender has no usable display name.
const FALLBACK_SENDER_NAME: &str = "WebGlow";

/// Body used for text messages with no text.
const FALLBACK_BODY: &str = "New message";

/// Why a resolved recipient was not notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The recipient profile no longer exists.
    RecipientMissing,
    /// No delivery token registered.
    NoToken,
    /// The recipient is online and will see the message directly.
    RecipientOnline,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::RecipientMissing => write!(f, "recipient_missing"),
            SkipReason::NoToken => write!(f, "no_token"),
            SkipReason::RecipientOnline => write!(f, "recipient_online"),
        }
    }
}

/// Outcome of the delivery gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryDecision {
    Send(PushMessage),
    Skip(SkipReason),
}

/// Check whether `recipient` may be notified, returning its token if so.
pub fn gate(recipient: Option<&Profile>) -> Result<&str, SkipReason> {
    let recipient = recipient.ok_or(SkipReason::RecipientMissing)?;
    let token = recipient.delivery_token().ok_or(SkipReason::NoToken)?;
    if recipient.online {
        return Err(SkipReason::RecipientOnline);
    }
    Ok(token)
}

/// Apply the gate and build the push payload.
///
/// `sender` is looked up at delivery time; a missing profile or blank
/// name falls back to the product name.
pub fn decide(
    message: &Message,
    recipient: Option<&Profile>,
    sender: Option<&Profile>,
) -> DeliveryDecision {
    match gate(recipient) {
        Ok(token) => DeliveryDecision::Send(PushMessage {
            token: token.to_string(),
            title: format_title(sender.map(|p| p.name.as_str())),
            body: format_body(message),
            data: PushData {
                conversation_id: message.conversation_id,
                sender_id: message.sender_id,
            },
        }),
        Err(reason) => DeliveryDecision::Skip(reason),
    }
}

pub fn format_title(sender_name: Option<&str>) -> String {
    let name = sender_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(FALLBACK_SENDER_NAME);
    format!("Message from {}", name)
}

/// Render the notification body from the message's media type or text.
pub fn format_body(message: &Message) -> String {
    match message.media_type {
        Some(MediaType::Image) => "📷 Photo".to_string(),
        Some(MediaType::Video) => "🎥 Video".to_string(),
        Some(MediaType::File) => {
            let name = message
                .file_name
                .as_deref()
                .filter(|n| !n.is_empty())
                .unwrap_or("File");
            format!("📎 {}", name)
        }
        None => message
            .text
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(FALLBACK_BODY)
            .to_string(),
    }
}
