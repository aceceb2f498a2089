use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::types::Json;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::{Store, SUBMISSION_FEED_CAPACITY};
use crate::models::contact::{Contact, ContactType};
use crate::models::custom_field::CustomField;
use crate::models::submission::{Submission, SubmissionKind};
use crate::models::sync::{SyncConfig, SyncLogEntry};

/// PostgreSQL-backed store. Documents live in JSONB `data` columns.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    submissions_tx: broadcast::Sender<Submission>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        let (submissions_tx, _) = broadcast::channel(SUBMISSION_FEED_CAPACITY);
        Self {
            pool,
            submissions_tx,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_contact(&self, contact: &Contact) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO contacts
                (id, contact_type, email, crm_id, dedup_key, version, created_at, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (dedup_key) DO NOTHING
            "#,
        )
        .bind(contact.id)
        .bind(contact.contact_type.as_str())
        .bind(&contact.email)
        .bind(&contact.crm_id)
        .bind(&contact.dedup_key)
        .bind(contact.version)
        .bind(contact.created_at)
        .bind(Json(contact))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_contact(&self, id: Uuid) -> Result<Option<Contact>> {
        let row: Option<Json<Contact>> =
            sqlx::query_scalar("SELECT data FROM contacts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|Json(c)| c))
    }

    async fn find_contact_by_crm_id(&self, crm_id: &str) -> Result<Option<Contact>> {
        let row: Option<Json<Contact>> = sqlx::query_scalar(
            "SELECT data FROM contacts WHERE crm_id = $1 ORDER BY created_at ASC LIMIT 1",
        )
        .bind(crm_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|Json(c)| c))
    }

    async fn list_contacts(&self) -> Result<Vec<Contact>> {
        let rows: Vec<Json<Contact>> =
            sqlx::query_scalar("SELECT data FROM contacts ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|Json(c)| c).collect())
    }

    async fn list_contacts_by_type(&self, contact_type: ContactType) -> Result<Vec<Contact>> {
        let rows: Vec<Json<Contact>> = sqlx::query_scalar(
            "SELECT data FROM contacts WHERE contact_type = $1 ORDER BY created_at DESC",
        )
        .bind(contact_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(c)| c).collect())
    }

    async fn replace_contact(&self, contact: &Contact, expected_version: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE contacts
            SET email = $2, crm_id = $3, version = $4, data = $5
            WHERE id = $1 AND version = $6
            "#,
        )
        .bind(contact.id)
        .bind(&contact.email)
        .bind(&contact.crm_id)
        .bind(contact.version)
        .bind(Json(contact))
        .bind(expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_custom_field(&self, field: &CustomField) -> Result<()> {
        sqlx::query("INSERT INTO custom_fields (id, created_at, data) VALUES ($1, $2, $3)")
            .bind(field.id)
            .bind(field.created_at)
            .bind(Json(field))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_custom_field(&self, id: Uuid) -> Result<Option<CustomField>> {
        let row: Option<Json<CustomField>> =
            sqlx::query_scalar("SELECT data FROM custom_fields WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|Json(f)| f))
    }

    async fn list_custom_fields(&self) -> Result<Vec<CustomField>> {
        let rows: Vec<Json<CustomField>> =
            sqlx::query_scalar("SELECT data FROM custom_fields ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|Json(f)| f).collect())
    }

    async fn replace_custom_field(&self, field: &CustomField) -> Result<()> {
        sqlx::query("UPDATE custom_fields SET data = $2 WHERE id = $1")
            .bind(field.id)
            .bind(Json(field))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_custom_field(&self, id: Uuid, deleted_at: DateTime<Utc>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let field: Option<Json<CustomField>> =
            sqlx::query_scalar("SELECT data FROM custom_fields WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(Json(mut field)) = field else {
            return Ok(0);
        };

        // Unset the key and bump the version in both the column and the document.
        let touched = sqlx::query(
            r#"
            UPDATE contacts
            SET version = version + 1,
                data = jsonb_set(
                    data #- ARRAY['customFields', $1]::text[],
                    '{version}',
                    to_jsonb(version + 1)
                )
            WHERE data -> 'customFields' ? $1
            "#,
        )
        .bind(&field.name)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        field.deleted = true;
        field.deleted_at = Some(deleted_at);
        sqlx::query("UPDATE custom_fields SET data = $2 WHERE id = $1")
            .bind(id)
            .bind(Json(&field))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(touched as usize)
    }

    async fn insert_submission(&self, submission: &Submission) -> Result<()> {
        sqlx::query(
            "INSERT INTO submissions (id, kind, processed, created_at, data) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(submission.id)
        .bind(submission.kind.as_str())
        .bind(submission.processed)
        .bind(submission.created_at)
        .bind(Json(submission))
        .execute(&self.pool)
        .await?;

        if self.submissions_tx.send(submission.clone()).is_err() {
            debug!("No live subscribers for submission {}", submission.id);
        }
        Ok(())
    }

    async fn list_unprocessed(&self, kind: SubmissionKind) -> Result<Vec<Submission>> {
        let rows: Vec<Json<Submission>> = sqlx::query_scalar(
            "SELECT data FROM submissions WHERE kind = $1 AND NOT processed ORDER BY created_at ASC",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(s)| s).collect())
    }

    async fn mark_processed(
        &self,
        id: Uuid,
        processed_by: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let patch = json!({
            "processed": true,
            "processedAt": processed_at,
            "processedBy": processed_by,
        });
        let result = sqlx::query(
            "UPDATE submissions SET processed = TRUE, data = data || $2 WHERE id = $1 AND NOT processed",
        )
        .bind(id)
        .bind(Json(patch))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    fn subscribe_submissions(&self) -> broadcast::Receiver<Submission> {
        self.submissions_tx.subscribe()
    }

    async fn append_log(&self, entry: &SyncLogEntry) -> Result<()> {
        sqlx::query("INSERT INTO sync_logs (id, timestamp, data) VALUES ($1, $2, $3)")
            .bind(entry.id)
            .bind(entry.timestamp)
            .bind(Json(entry))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        let rows: Vec<Json<SyncLogEntry>> =
            sqlx::query_scalar("SELECT data FROM sync_logs ORDER BY timestamp DESC LIMIT $1")
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|Json(e)| e).collect())
    }

    async fn get_sync_config(&self) -> Result<Option<SyncConfig>> {
        let row: Option<Json<SyncConfig>> =
            sqlx::query_scalar("SELECT data FROM sync_config WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|Json(c)| c))
    }

    async fn put_sync_config(&self, config: &SyncConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_config (id, data) VALUES (1, $1) ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(Json(config))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
