//! Contact form submissions.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::{now_rfc3339, ContactStatus};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateContactRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateContactRequest {
    pub status: Option<ContactStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ContactQuery {
    pub status: Option<String>,
}

pub async fn insert_contact(
    pool: &SqlitePool,
    req: &CreateContactRequest,
) -> Result<Contact, sqlx::Error> {
    let now = now_rfc3339();
    sqlx::query_as::<_, Contact>(
        r#"
        INSERT INTO contacts (id, name, email, phone, subject, message, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        RETURNING *
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(req.name.trim())
    .bind(req.email.trim())
    .bind(&req.phone)
    .bind(req.subject.trim())
    .bind(req.message.trim())
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await
}

pub async fn list_contacts(
    pool: &SqlitePool,
    status: Option<ContactStatus>,
) -> Result<Vec<Contact>, sqlx::Error> {
    match status {
        Some(status) => {
            sqlx::query_as::<_, Contact>(
                "SELECT * FROM contacts WHERE status = ? ORDER BY created_at DESC",
            )
            .bind(status.as_str())
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, Contact>("SELECT * FROM contacts ORDER BY created_at DESC")
                .fetch_all(pool)
                .await
        }
    }
}

pub async fn update_contact(
    pool: &SqlitePool,
    id: &str,
    req: &UpdateContactRequest,
) -> Result<Option<Contact>, sqlx::Error> {
    sqlx::query_as::<_, Contact>(
        r#"
        UPDATE contacts SET
            status = COALESCE(?, status),
            notes = COALESCE(?, notes),
            updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(req.status.map(|s| s.as_str()))
    .bind(&req.notes)
    .bind(now_rfc3339())
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn delete_contact(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM contacts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
