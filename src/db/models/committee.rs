//! Committee models and queries.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;
use thiserror::Error;

use super::common::{now_rfc3339, parse_json_list, serialize_json_list};
use super::portfolio::Portfolio;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Committee {
    pub id: String,
    pub name: String,
    pub description: String,
    pub capacity: i64,
    pub registered: i64,
    pub topics: String,
    pub chairs: String,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// A member of the committee's executive board
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chair {
    pub name: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitteeResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub capacity: i64,
    pub registered: i64,
    pub topics: Vec<String>,
    pub chairs: Vec<Chair>,
    pub portfolios: Vec<Portfolio>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Committee {
    pub fn to_response(self, portfolios: Vec<Portfolio>) -> CommitteeResponse {
        CommitteeResponse {
            topics: parse_json_list(Some(&self.topics)),
            chairs: parse_json_list(Some(&self.chairs)),
            id: self.id,
            name: self.name,
            description: self.description,
            capacity: self.capacity,
            registered: self.registered,
            portfolios,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommitteeRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capacity: i64,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub chairs: Vec<Chair>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCommitteeRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub capacity: Option<i64>,
    pub topics: Option<Vec<String>>,
    pub chairs: Option<Vec<Chair>>,
    /// When present the update only applies if the stored version matches
    pub version: Option<i64>,
}

#[derive(Debug, Error)]
pub enum CommitteeError {
    #[error("committee not found")]
    NotFound,
    #[error("committee was modified concurrently (current version {current})")]
    VersionConflict { current: i64 },
    #[error("committee still has {0} allocated delegates")]
    HasAllocations(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

async fn portfolios_by_committee(
    pool: &SqlitePool,
) -> Result<HashMap<String, Vec<Portfolio>>, sqlx::Error> {
    let rows = sqlx::query_as::<_, Portfolio>(
        "SELECT * FROM portfolios ORDER BY committee_id, created_at, name",
    )
    .fetch_all(pool)
    .await?;

    let mut grouped: HashMap<String, Vec<Portfolio>> = HashMap::new();
    for p in rows {
        grouped.entry(p.committee_id.clone()).or_default().push(p);
    }
    Ok(grouped)
}

pub async fn list_committees(pool: &SqlitePool) -> Result<Vec<CommitteeResponse>, sqlx::Error> {
    let committees = sqlx::query_as::<_, Committee>("SELECT * FROM committees ORDER BY name")
        .fetch_all(pool)
        .await?;
    let mut portfolios = portfolios_by_committee(pool).await?;

    Ok(committees
        .into_iter()
        .map(|c| {
            let ps = portfolios.remove(&c.id).unwrap_or_default();
            c.to_response(ps)
        })
        .collect())
}

pub async fn find_committee(pool: &SqlitePool, id: &str) -> Result<Option<Committee>, sqlx::Error> {
    sqlx::query_as::<_, Committee>("SELECT * FROM committees WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_committee_by_name(
    pool: &SqlitePool,
    name: &str,
) -> Result<Option<Committee>, sqlx::Error> {
    sqlx::query_as::<_, Committee>("SELECT * FROM committees WHERE name = ? COLLATE NOCASE")
        .bind(name.trim())
        .fetch_optional(pool)
        .await
}

pub async fn get_committee(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<CommitteeResponse>, sqlx::Error> {
    let Some(committee) = find_committee(pool, id).await? else {
        return Ok(None);
    };
    let portfolios = sqlx::query_as::<_, Portfolio>(
        "SELECT * FROM portfolios WHERE committee_id = ? ORDER BY created_at, name",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;
    Ok(Some(committee.to_response(portfolios)))
}

pub async fn create_committee(
    pool: &SqlitePool,
    req: &CreateCommitteeRequest,
) -> Result<CommitteeResponse, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_rfc3339();

    let committee = sqlx::query_as::<_, Committee>(
        r#"
        INSERT INTO committees (id, name, description, capacity, registered, topics, chairs, version, created_at, updated_at)
        VALUES (?, ?, ?, ?, 0, ?, ?, 1, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&id)
    .bind(req.name.trim())
    .bind(&req.description)
    .bind(req.capacity)
    .bind(serialize_json_list(&req.topics))
    .bind(serialize_json_list(&req.chairs))
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await?;

    Ok(committee.to_response(Vec::new()))
}

/// Apply a partial update, bumping `version`.
///
/// When `req.version` is set the update only applies to that version. A
/// rename is carried over to registrations allocated to the committee.
pub async fn update_committee(
    pool: &SqlitePool,
    id: &str,
    req: &UpdateCommitteeRequest,
) -> Result<CommitteeResponse, CommitteeError> {
    let topics = req.topics.as_deref().map(serialize_json_list);
    let chairs = req.chairs.as_deref().map(serialize_json_list);

    let mut tx = pool.begin().await?;

    let previous = sqlx::query_as::<_, Committee>("SELECT * FROM committees WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CommitteeError::NotFound)?;

    if req.version.is_some_and(|v| v != previous.version) {
        return Err(CommitteeError::VersionConflict {
            current: previous.version,
        });
    }

    let committee = sqlx::query_as::<_, Committee>(
        r#"
        UPDATE committees SET
            name = COALESCE(?, name),
            description = COALESCE(?, description),
            capacity = COALESCE(?, capacity),
            topics = COALESCE(?, topics),
            chairs = COALESCE(?, chairs),
            version = version + 1,
            updated_at = ?
        WHERE id = ? AND version = ?
        RETURNING *
        "#,
    )
    .bind(req.name.as_deref().map(str::trim))
    .bind(&req.description)
    .bind(req.capacity)
    .bind(topics)
    .bind(chairs)
    .bind(now_rfc3339())
    .bind(id)
    .bind(previous.version)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(CommitteeError::VersionConflict {
        current: previous.version + 1,
    })?;

    if committee.name != previous.name {
        sqlx::query(
            "UPDATE registrations SET allocated_committee = ? WHERE allocated_committee = ? COLLATE NOCASE",
        )
        .bind(&committee.name)
        .bind(&previous.name)
        .execute(&mut *tx)
        .await?;
    }

    let portfolios = sqlx::query_as::<_, Portfolio>(
        "SELECT * FROM portfolios WHERE committee_id = ? ORDER BY created_at, name",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(committee.to_response(portfolios))
}

/// Delete a committee and its portfolios. Refused while registrations are
/// allocated to it. Returns whether a row was deleted.
pub async fn delete_committee(pool: &SqlitePool, id: &str) -> Result<bool, CommitteeError> {
    let Some(committee) = find_committee(pool, id).await? else {
        return Ok(false);
    };

    let (allocated,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM registrations WHERE allocated_committee = ? COLLATE NOCASE",
    )
    .bind(&committee.name)
    .fetch_one(pool)
    .await?;
    if allocated > 0 {
        return Err(CommitteeError::HasAllocations(allocated));
    }

    let result = sqlx::query("DELETE FROM committees WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
