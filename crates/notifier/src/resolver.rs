//! Recipient resolution — maps an inserted message to the one profile to notify.
//!
//! - Client wrote it: the assigned admin, or any admin when unassigned.
//! - Anyone else wrote it: the conversation's client.

use uuid::Uuid;

use webglow_common::types::{Conversation, Message};

use crate::directory::Directory;
use crate::error::NotifierError;

/// Who should receive the notification, before any lookup happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientRule {
    /// A known profile id.
    Profile(Uuid),
    /// Unassigned conversation: fall back to the directory's admin pick.
    AnyAdmin,
}

impl RecipientRule {
    pub fn for_message(message: &Message, conversation: &Conversation) -> Self {
        if message.sender_id == conversation.client_id {
            match conversation.assigned_admin_id {
                Some(admin_id) => RecipientRule::Profile(admin_id),
                None => RecipientRule::AnyAdmin,
            }
        } else {
            RecipientRule::Profile(conversation.client_id)
        }
    }
}

/// Resolve the recipient id for `message` within `conversation`.
///
/// Returns `Ok(None)` when the fallback path finds no admin at all.
pub async fn resolve_recipient(
    directory: &dyn Directory,
    message: &Message,
    conversation: &Conversation,
) -> Result<Option<Uuid>, NotifierError> {
    match RecipientRule::for_message(message, conversation) {
        RecipientRule::Profile(id) => Ok(Some(id)),
        RecipientRule::AnyAdmin => {
            let admin = directory.find_any_admin().await?;
            if admin.is_none() {
                tracing::info!(
                    conversation_id = %conversation.id,
                    "Unassigned conversation and no admin profile exists"
                );
            }
            Ok(admin)
        }
    }
}
