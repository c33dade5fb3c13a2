//! Read-only lookups against the managed Postgres database.
//!
//! The notifier never writes conversations or profiles. Every lookup returns
//! `Ok(None)` for rows that do not exist (or were deleted after the message
//! was inserted), so callers can treat misses as "no recipient".

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use webglow_common::types::{Conversation, Profile};

use crate::error::NotifierError;

/// Conversation and profile lookups used to route a notification.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, NotifierError>;

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, NotifierError>;

    /// Fallback admin for unassigned conversations.
    ///
    /// Must be deterministic for a fixed set of admins: the oldest admin
    /// profile wins, ties broken by the lowest id.
    async fn find_any_admin(&self) -> Result<Option<Uuid>, NotifierError>;
}

/// `Directory` backed by the `conversations` and `profiles` tables.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, NotifierError> {
        let conversation: Option<Conversation> = sqlx::query_as(
            "SELECT id, client_id, assigned_admin_id FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn get_profile(&self, id: Uuid) -> Result<Option<Profile>, NotifierError> {
        let profile: Option<Profile> = sqlx::query_as(
            r#"
            SELECT id, name, role, fcm_token, COALESCE(online, false) AS online
            FROM profiles
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(profile)
    }

    async fn find_any_admin(&self) -> Result<Option<Uuid>, NotifierError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM profiles
            WHERE role = 'admin'
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }
}
