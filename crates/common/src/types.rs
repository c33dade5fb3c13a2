use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Role of a profile in the support chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Role {
    Client,
    Admin,
}

/// Kind of attachment carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    File,
}

/// A chat message as delivered by the insert feed.
///
/// Rows are immutable once inserted; the notifier only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media_type: Option<MediaType>,
    #[serde(default)]
    pub file_name: Option<String>,
    /// Insert time. Unparseable values are read as `None` rather than
    /// rejecting the record.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Accept RFC 3339 timestamps and zone-less ones (taken as UTC).
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    Ok(NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|ts| ts.and_utc()))
}

/// A support conversation between one client and (optionally) an assigned admin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub client_id: Uuid,
    pub assigned_admin_id: Option<Uuid>,
}

/// The parts of a user profile the notifier cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    /// Push delivery token. Absent means the user never enabled notifications.
    pub fcm_token: Option<String>,
    /// Presence flag, maintained by the web client.
    pub online: bool,
}

impl Profile {
    /// Delivery token, if one is registered and non-empty.
    pub fn delivery_token(&self) -> Option<&str> {
        self.fcm_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Data attached to a push notification so the client can open the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushData {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
}

/// Push notification ready for delivery to a single device token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Delivery token of the recipient
    pub token: String,
    /// Short title (e.g., "Message from Alice")
    pub title: String,
    /// Body text, formatted from the message content
    pub body: String,
    pub data: PushData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_from_feed_record() {
        let record = serde_json::json!({
            "id": "0b5e8a4e-0d4e-4c61-9b53-3a1d7c8f2f01",
            "conversation_id": "5a3c0f7e-2b9d-4a77-8d8b-6c0e1f3d2a11",
            "sender_id": "9c1d2e3f-4a5b-4c6d-8e7f-0a1b2c3d4e5f",
            "text": null,
            "media_url": "https://cdn.example/a.png",
            "media_type": "image",
            "file_name": null,
            "is_read": false,
            "created_at": "2025-03-01T10:15:30.123456+00:00"
        });
        let message: Message = serde_json::from_value(record).unwrap();
        assert_eq!(message.media_type, Some(MediaType::Image));
        assert!(message.text.is_none());
        assert!(message.created_at.is_some());
    }

    #[test]
    fn test_message_timestamp_is_lenient() {
        let record = |created_at: serde_json::Value| {
            serde_json::json!({
                "id": "0b5e8a4e-0d4e-4c61-9b53-3a1d7c8f2f01",
                "conversation_id": "5a3c0f7e-2b9d-4a77-8d8b-6c0e1f3d2a11",
                "sender_id": "9c1d2e3f-4a5b-4c6d-8e7f-0a1b2c3d4e5f",
                "text": "hi",
                "created_at": created_at
            })
        };

        let naive: Message =
            serde_json::from_value(record(serde_json::json!("2025-03-01T10:15:30.123456"))).unwrap();
        assert_eq!(
            naive.created_at.map(|ts| ts.to_rfc3339()),
            Some("2025-03-01T10:15:30.123456+00:00".to_string())
        );

        let garbage: Message =
            serde_json::from_value(record(serde_json::json!("yesterday"))).unwrap();
        assert_eq!(garbage.created_at, None);

        let null: Message = serde_json::from_value(record(serde_json::Value::Null)).unwrap();
        assert_eq!(null.created_at, None);

        let mut missing = record(serde_json::Value::Null);
        missing.as_object_mut().unwrap().remove("created_at");
        let missing: Message = serde_json::from_value(missing).unwrap();
        assert_eq!(missing.created_at, None);
    }

    #[test]
    fn test_delivery_token_ignores_blank() {
        let mut profile = Profile {
            id: Uuid::new_v4(),
            name: "Ana".to_string(),
            role: Role::Client,
            fcm_token: Some("   ".to_string()),
            online: false,
        };
        assert_eq!(profile.delivery_token(), None);

        profile.fcm_token = Some("tok1".to_string());
        assert_eq!(profile.delivery_token(), Some("tok1"));
    }

    #[test]
    fn test_push_data_uses_camel_case() {
        let data = PushData {
            conversation_id: Uuid::nil(),
            sender_id: Uuid::nil(),
        };
        let value = serde_json::to_value(&data).unwrap();
        assert!(value.get("conversationId").is_some());
        assert!(value.get("senderId").is_some());
    }
}
