//! Portfolios (country or role seats) inside a committee.
//!
//! Each portfolio is its own row keyed by `(committee_id, id)`, so every
//! operation here is a single statement and concurrent writers to the same
//! committee cannot overwrite each other's changes.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;

use super::common::now_rfc3339;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub id: String,
    pub committee_id: String,
    pub name: String,
    pub description: String,
    pub capacity: i64,
    pub registered: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPortfolio {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_capacity")]
    pub capacity: i64,
}

fn default_capacity() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PortfolioUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub capacity: Option<i64>,
    pub registered: Option<i64>,
}

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("committee not found")]
    CommitteeNotFound,
    #[error("portfolio not found")]
    NotFound,
    #[error("a portfolio with this name already exists in the committee")]
    DuplicateName,
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for PortfolioError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.message().contains("UNIQUE constraint failed") {
                return PortfolioError::DuplicateName;
            }
        }
        PortfolioError::Database(err)
    }
}

async fn ensure_committee(pool: &SqlitePool, committee_id: &str) -> Result<(), PortfolioError> {
    let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM committees WHERE id = ?")
        .bind(committee_id)
        .fetch_optional(pool)
        .await?;
    exists.map(|_| ()).ok_or(PortfolioError::CommitteeNotFound)
}

pub async fn list_portfolios(
    pool: &SqlitePool,
    committee_id: &str,
) -> Result<Vec<Portfolio>, PortfolioError> {
    ensure_committee(pool, committee_id).await?;
    let portfolios = sqlx::query_as::<_, Portfolio>(
        "SELECT * FROM portfolios WHERE committee_id = ? ORDER BY created_at, name",
    )
    .bind(committee_id)
    .fetch_all(pool)
    .await?;
    Ok(portfolios)
}

pub async fn find_portfolio_by_name(
    pool: &SqlitePool,
    committee_id: &str,
    name: &str,
) -> Result<Option<Portfolio>, sqlx::Error> {
    sqlx::query_as::<_, Portfolio>(
        "SELECT * FROM portfolios WHERE committee_id = ? AND name = ? COLLATE NOCASE",
    )
    .bind(committee_id)
    .bind(name.trim())
    .fetch_optional(pool)
    .await
}

pub async fn add_portfolio(
    pool: &SqlitePool,
    committee_id: &str,
    new: &NewPortfolio,
) -> Result<Portfolio, PortfolioError> {
    ensure_committee(pool, committee_id).await?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = now_rfc3339();
    let portfolio = sqlx::query_as::<_, Portfolio>(
        r#"
        INSERT INTO portfolios (id, committee_id, name, description, capacity, registered, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, 0, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&id)
    .bind(committee_id)
    .bind(new.name.trim())
    .bind(&new.description)
    .bind(new.capacity)
    .bind(&now)
    .bind(&now)
    .fetch_one(pool)
    .await?;

    Ok(portfolio)
}

/// Merge the provided fields into a portfolio. A rename is carried over to
/// registrations allocated to the portfolio.
pub async fn update_portfolio(
    pool: &SqlitePool,
    committee_id: &str,
    portfolio_id: &str,
    fields: &PortfolioUpdate,
) -> Result<Portfolio, PortfolioError> {
    ensure_committee(pool, committee_id).await?;

    let mut tx = pool.begin().await?;

    let (previous_name, committee_name): (String, String) = sqlx::query_as(
        r#"
        SELECT p.name, c.name FROM portfolios p
        JOIN committees c ON c.id = p.committee_id
        WHERE p.committee_id = ? AND p.id = ?
        "#,
    )
    .bind(committee_id)
    .bind(portfolio_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(PortfolioError::NotFound)?;

    let portfolio = sqlx::query_as::<_, Portfolio>(
        r#"
        UPDATE portfolios SET
            name = COALESCE(?, name),
            description = COALESCE(?, description),
            capacity = COALESCE(?, capacity),
            registered = COALESCE(?, registered),
            updated_at = ?
        WHERE committee_id = ? AND id = ?
        RETURNING *
        "#,
    )
    .bind(fields.name.as_deref().map(str::trim))
    .bind(&fields.description)
    .bind(fields.capacity)
    .bind(fields.registered)
    .bind(now_rfc3339())
    .bind(committee_id)
    .bind(portfolio_id)
    .fetch_one(&mut *tx)
    .await?;

    if portfolio.name != previous_name {
        sqlx::query(
            r#"
            UPDATE registrations SET allocated_portfolio = ?
            WHERE allocated_committee = ? COLLATE NOCASE
              AND allocated_portfolio = ? COLLATE NOCASE
            "#,
        )
        .bind(&portfolio.name)
        .bind(&committee_name)
        .bind(&previous_name)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(portfolio)
}

/// Remove a portfolio. Returns whether a row was deleted; removing an
/// already-removed id is not an error.
pub async fn remove_portfolio(
    pool: &SqlitePool,
    committee_id: &str,
    portfolio_id: &str,
) -> Result<bool, PortfolioError> {
    ensure_committee(pool, committee_id).await?;

    let result = sqlx::query("DELETE FROM portfolios WHERE committee_id = ? AND id = ?")
        .bind(committee_id)
        .bind(portfolio_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_committee, init_memory, CreateCommitteeRequest};

    async fn setup() -> (SqlitePool, String) {
        let pool = init_memory().await.unwrap();
        let committee = create_committee(
            &pool,
            &CreateCommitteeRequest {
                name: "UNSC".to_string(),
                description: String::new(),
                capacity: 15,
                topics: vec![],
                chairs: vec![],
            },
        )
        .await
        .unwrap();
        (pool, committee.id)
    }

    fn portfolio(name: &str) -> NewPortfolio {
        NewPortfolio {
            name: name.to_string(),
            description: format!("Delegate of {}", name),
            capacity: 2,
        }
    }

    #[tokio::test]
    async fn test_list_empty_committee() {
        let (pool, committee_id) = setup().await;
        assert!(list_portfolios(&pool, &committee_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_then_list_contains_one_new_entry() {
        let (pool, committee_id) = setup().await;
        add_portfolio(&pool, &committee_id, &portfolio("France")).await.unwrap();

        let before = list_portfolios(&pool, &committee_id).await.unwrap();
        let added = add_portfolio(&pool, &committee_id, &portfolio("United States"))
            .await
            .unwrap();
        let after = list_portfolios(&pool, &committee_id).await.unwrap();

        assert_eq!(after.len(), before.len() + 1);
        let new_entries: Vec<_> = after.iter().filter(|p| !before.contains(p)).collect();
        assert_eq!(new_entries.len(), 1);
        let entry = new_entries[0];
        assert_eq!(entry.id, added.id);
        assert_eq!(entry.registered, 0);
        assert_eq!(entry.name, "United States");
        assert_eq!(entry.description, "Delegate of United States");
        assert_eq!(entry.capacity, 2);
    }

    #[tokio::test]
    async fn test_add_to_missing_committee() {
        let (pool, _) = setup().await;
        let err = add_portfolio(&pool, "nope", &portfolio("France")).await.unwrap_err();
        assert!(matches!(err, PortfolioError::CommitteeNotFound));
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let (pool, committee_id) = setup().await;
        add_portfolio(&pool, &committee_id, &portfolio("France")).await.unwrap();
        let err = add_portfolio(&pool, &committee_id, &portfolio("France"))
            .await
            .unwrap_err();
        assert!(matches!(err, PortfolioError::DuplicateName));
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let (pool, committee_id) = setup().await;
        let added = add_portfolio(&pool, &committee_id, &portfolio("China")).await.unwrap();

        let updated = update_portfolio(
            &pool,
            &committee_id,
            &added.id,
            &PortfolioUpdate {
                capacity: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.capacity, 3);
        assert_eq!(updated.name, "China");
        assert_eq!(updated.description, "Delegate of China");
    }

    #[tokio::test]
    async fn test_update_missing_portfolio_leaves_set_unchanged() {
        let (pool, committee_id) = setup().await;
        add_portfolio(&pool, &committee_id, &portfolio("China")).await.unwrap();
        let before = list_portfolios(&pool, &committee_id).await.unwrap();

        let err = update_portfolio(
            &pool,
            &committee_id,
            "does-not-exist",
            &PortfolioUpdate {
                name: Some("Russia".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PortfolioError::NotFound));
        assert_eq!(list_portfolios(&pool, &committee_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (pool, committee_id) = setup().await;
        let keep = add_portfolio(&pool, &committee_id, &portfolio("India")).await.unwrap();
        let removed = add_portfolio(&pool, &committee_id, &portfolio("Brazil")).await.unwrap();

        assert!(remove_portfolio(&pool, &committee_id, &removed.id).await.unwrap());
        let after_first = list_portfolios(&pool, &committee_id).await.unwrap();

        assert!(!remove_portfolio(&pool, &committee_id, &removed.id).await.unwrap());
        let after_second = list_portfolios(&pool, &committee_id).await.unwrap();

        assert_eq!(after_first, after_second);
        assert_eq!(after_second.len(), 1);
        assert_eq!(after_second[0].id, keep.id);
    }

    #[tokio::test]
    async fn test_concurrent_adds_are_not_lost() {
        let (pool, committee_id) = setup().await;

        let mut handles = Vec::new();
        for i in 0..20 {
            let pool = pool.clone();
            let committee_id = committee_id.clone();
            handles.push(tokio::spawn(async move {
                add_portfolio(&pool, &committee_id, &portfolio(&format!("Country {}", i)))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let all = list_portfolios(&pool, &committee_id).await.unwrap();
        assert_eq!(all.len(), 20);
    }

    #[tokio::test]
    async fn test_deleting_committee_removes_portfolios() {
        let (pool, committee_id) = setup().await;
        add_portfolio(&pool, &committee_id, &portfolio("Japan")).await.unwrap();
        crate::db::delete_committee(&pool, &committee_id).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM portfolios")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
