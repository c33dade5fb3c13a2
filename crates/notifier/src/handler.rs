//! Per-message notification handler.
//!
//! Runs recipient resolution and the delivery gate for one inserted message,
//! then hands the payload to the push sender. Every failure is absorbed here:
//! the handler reports an `Outcome` and never returns an error, so one bad
//! message cannot affect the subscription or other handlers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use webglow_common::types::Message;

use crate::delivery::{self, DeliveryDecision, SkipReason};
use crate::directory::Directory;
use crate::error::NotifierError;
use crate::ledger::DeliveryLedger;
use crate::push::PushSender;
use crate::resolver;

/// What happened to a single inserted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Sent {
        recipient_id: Uuid,
        provider_message_id: String,
    },
    /// The parent conversation no longer exists.
    NoConversation,
    /// Unassigned conversation and no admin to fall back to.
    NoRecipient,
    Skipped(SkipReason),
    /// Already notified for this message id (ledger enabled only).
    Duplicate,
    SendFailed,
    LookupFailed,
    TimedOut,
}

/// Stateless handler shared by all worker tasks.
pub struct NotificationHandler {
    directory: Arc<dyn Directory>,
    push: Arc<dyn PushSender>,
    ledger: Option<Arc<dyn DeliveryLedger>>,
    call_timeout: Duration,
}

impl NotificationHandler {
    pub fn new(
        directory: Arc<dyn Directory>,
        push: Arc<dyn PushSender>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            push,
            ledger: None,
            call_timeout,
        }
    }

    /// Enable deduplication of repeated deliveries of the same message.
    pub fn with_ledger(mut self, ledger: Arc<dyn DeliveryLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Process one inserted message.
    pub async fn handle(&self, message: &Message) -> Outcome {
        match self.try_handle(message).await {
            Ok(outcome) => outcome,
            Err(NotifierError::Timeout(ms)) => {
                tracing::warn!(message_id = %message.id, timeout_ms = ms, "Lookup timed out");
                Outcome::TimedOut
            }
            Err(e) => {
                tracing::error!(
                    message_id = %message.id,
                    error = %e,
                    "Error handling message notification"
                );
                Outcome::LookupFailed
            }
        }
    }

    async fn try_handle(&self, message: &Message) -> Result<Outcome, NotifierError> {
        let Some(conversation) = self
            .bounded(self.directory.get_conversation(message.conversation_id))
            .await?
        else {
            tracing::info!(
                message_id = %message.id,
                conversation_id = %message.conversation_id,
                "Conversation not found, dropping message"
            );
            return Ok(Outcome::NoConversation);
        };

        let Some(recipient_id) = self
            .bounded(resolver::resolve_recipient(
                self.directory.as_ref(),
                message,
                &conversation,
            ))
            .await?
        else {
            tracing::info!(message_id = %message.id, "No recipient found for message");
            return Ok(Outcome::NoRecipient);
        };

        let recipient = self
            .bounded(self.directory.get_profile(recipient_id))
            .await?;
        if let Err(reason) = delivery::gate(recipient.as_ref()) {
            tracing::debug!(
                message_id = %message.id,
                recipient_id = %recipient_id,
                reason = %reason,
                "Notification skipped"
            );
            return Ok(Outcome::Skipped(reason));
        }

        // Only the title depends on the sender; fall back to the product name.
        let sender = match self
            .bounded(self.directory.get_profile(message.sender_id))
            .await
        {
            Ok(sender) => sender,
            Err(e) => {
                tracing::warn!(
                    message_id = %message.id,
                    sender_id = %message.sender_id,
                    error = %e,
                    "Sender lookup failed, using default title"
                );
                None
            }
        };
        let push = match delivery::decide(message, recipient.as_ref(), sender.as_ref()) {
            DeliveryDecision::Send(push) => push,
            DeliveryDecision::Skip(reason) => return Ok(Outcome::Skipped(reason)),
        };

        if let Some(ledger) = &self.ledger {
            match self.bounded(ledger.claim(message.id)).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(message_id = %message.id, "Duplicate delivery suppressed");
                    return Ok(Outcome::Duplicate);
                }
                Err(e) => {
                    tracing::warn!(
                        message_id = %message.id,
                        error = %e,
                        "Delivery ledger unavailable, sending anyway"
                    );
                }
            }
        }

        match self.bounded(self.push.send(&push)).await {
            Ok(provider_message_id) => {
                tracing::info!(
                    message_id = %message.id,
                    recipient_id = %recipient_id,
                    provider_message_id = %provider_message_id,
                    "Notification sent"
                );
                Ok(Outcome::Sent {
                    recipient_id,
                    provider_message_id,
                })
            }
            Err(NotifierError::Timeout(ms)) => {
                tracing::warn!(message_id = %message.id, timeout_ms = ms, "Push send timed out");
                Ok(Outcome::TimedOut)
            }
            Err(e) => {
                tracing::error!(
                    message_id = %message.id,
                    recipient_id = %recipient_id,
                    error = %e,
                    "Push send failed"
                );
                Ok(Outcome::SendFailed)
            }
        }
    }

    /// Run `call` under the configured per-call timeout.
    async fn bounded<T, F>(&self, call: F) -> Result<T, NotifierError>
    where
        F: Future<Output = Result<T, NotifierError>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(NotifierError::Timeout(self.call_timeout.as_millis() as u64)),
        }
    }
}
