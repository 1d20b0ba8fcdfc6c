//! Aggregates for the staff dashboards.

use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_registrations: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_payment_status: BTreeMap<String, i64>,
    pub allocated: i64,
    pub unallocated: i64,
    pub total_users: i64,
    pub pending_contacts: i64,
    pub committees: Vec<CommitteeFill>,
    pub recent_registrations: Vec<RecentRegistration>,
}

/// Seats taken per committee
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CommitteeFill {
    pub id: String,
    pub name: String,
    pub capacity: i64,
    pub registered: i64,
    pub portfolio_count: i64,
    /// Applicants who ranked this committee first
    pub first_preference_count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RecentRegistration {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub institution: String,
    pub status: String,
    pub created_at: String,
}

async fn grouped_counts(pool: &SqlitePool, column: &str) -> Result<BTreeMap<String, i64>, sqlx::Error> {
    let sql = format!(
        "SELECT {col}, COUNT(*) FROM registrations GROUP BY {col}",
        col = column
    );
    let rows: Vec<(String, i64)> = sqlx::query_as(&sql).fetch_all(pool).await?;
    Ok(rows.into_iter().collect())
}

pub async fn dashboard_stats(pool: &SqlitePool) -> Result<DashboardStats, sqlx::Error> {
    let (total_registrations,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM registrations")
        .fetch_one(pool)
        .await?;
    let (allocated,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM registrations WHERE allocated_committee IS NOT NULL",
    )
    .fetch_one(pool)
    .await?;
    let (total_users,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'delegate'")
        .fetch_one(pool)
        .await?;
    let (pending_contacts,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM contacts WHERE status = 'pending'")
            .fetch_one(pool)
            .await?;

    let committees = sqlx::query_as::<_, CommitteeFill>(
        r#"
        SELECT c.id, c.name, c.capacity, c.registered,
            (SELECT COUNT(*) FROM portfolios p WHERE p.committee_id = c.id) AS portfolio_count,
            (SELECT COUNT(*) FROM registrations r
                WHERE r.committee_preference_1 = c.name COLLATE NOCASE) AS first_preference_count
        FROM committees c
        ORDER BY c.name
        "#,
    )
    .fetch_all(pool)
    .await?;

    let recent_registrations = sqlx::query_as::<_, RecentRegistration>(
        r#"
        SELECT id, first_name, last_name, institution, status, created_at
        FROM registrations
        ORDER BY created_at DESC
        LIMIT 10
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(DashboardStats {
        total_registrations,
        by_status: grouped_counts(pool, "status").await?,
        by_payment_status: grouped_counts(pool, "payment_status").await?,
        allocated,
        unallocated: total_registrations - allocated,
        total_users,
        pending_contacts,
        committees,
        recent_registrations,
    })
}
