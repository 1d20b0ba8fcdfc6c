//! Delegate registrations, allocation and status changes.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use super::common::{now_rfc3339, PaymentStatus, RegistrationStatus};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: String,
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub institution: String,
    pub grade: Option<String>,
    pub city: Option<String>,
    pub experience: Option<String>,
    pub dietary_requirements: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub committee_preference_1: String,
    pub portfolio_preference_1: String,
    pub committee_preference_2: Option<String>,
    pub portfolio_preference_2: Option<String>,
    pub committee_preference_3: Option<String>,
    pub portfolio_preference_3: Option<String>,
    pub id_document_path: Option<String>,
    pub mun_resume_path: Option<String>,
    pub status: String,
    pub payment_status: String,
    pub allocated_committee: Option<String>,
    pub allocated_portfolio: Option<String>,
    pub admin_notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One ranked (committee, portfolio) choice
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Preference {
    pub committee: String,
    pub portfolio: Option<String>,
}

impl Registration {
    pub fn status(&self) -> RegistrationStatus {
        self.status.parse().unwrap_or(RegistrationStatus::Pending)
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status.parse().unwrap_or(PaymentStatus::Pending)
    }

    /// Preferences in rank order, skipping empty slots
    pub fn preferences(&self) -> Vec<Preference> {
        let mut prefs = vec![Preference {
            committee: self.committee_preference_1.clone(),
            portfolio: Some(self.portfolio_preference_1.clone()),
        }];
        for (committee, portfolio) in [
            (&self.committee_preference_2, &self.portfolio_preference_2),
            (&self.committee_preference_3, &self.portfolio_preference_3),
        ] {
            if let Some(c) = committee.as_ref().filter(|c| !c.trim().is_empty()) {
                prefs.push(Preference {
                    committee: c.clone(),
                    portfolio: portfolio.clone(),
                });
            }
        }
        prefs
    }

    pub fn is_fully_allocated(&self) -> bool {
        self.allocated_committee.is_some() && self.allocated_portfolio.is_some()
    }

    /// Stored upload paths, for cleanup on delete
    pub fn document_paths(&self) -> Vec<&str> {
        [&self.id_document_path, &self.mun_resume_path]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .collect()
    }
}

/// Applicant-supplied fields of a new registration
#[derive(Debug, Clone, Default)]
pub struct NewRegistration {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub institution: String,
    pub grade: Option<String>,
    pub city: Option<String>,
    pub experience: Option<String>,
    pub dietary_requirements: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_phone: Option<String>,
    pub committee_preference_1: String,
    pub portfolio_preference_1: String,
    pub committee_preference_2: Option<String>,
    pub portfolio_preference_2: Option<String>,
    pub committee_preference_3: Option<String>,
    pub portfolio_preference_3: Option<String>,
    pub id_document_path: Option<String>,
    pub mun_resume_path: Option<String>,
}

/// Query parameters for the staff registration list
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationQuery {
    pub status: Option<String>,
    pub payment_status: Option<String>,
    /// Matches the allocated committee or the first preference
    pub committee: Option<String>,
    /// Substring of name, email or institution
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationListResponse {
    pub success: bool,
    pub registrations: Vec<Registration>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

/// Staff-side change to a registration, applied atomically
#[derive(Debug, Clone, Default)]
pub struct RegistrationUpdate {
    pub status: Option<RegistrationStatus>,
    /// Committee name; an empty string clears the allocation
    pub allocated_committee: Option<String>,
    /// Portfolio name within the allocated committee; empty clears it
    pub allocated_portfolio: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub admin_notes: Option<String>,
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("registration not found")]
    NotFound,
    #[error("cannot change status from {from} to {to}")]
    InvalidTransition {
        from: RegistrationStatus,
        to: RegistrationStatus,
    },
    #[error("committee '{0}' does not exist")]
    CommitteeNotFound(String),
    #[error("portfolio '{0}' does not exist in the allocated committee")]
    PortfolioNotFound(String),
    #[error("a portfolio cannot be allocated without a committee")]
    PortfolioWithoutCommittee,
    #[error("portfolio '{0}' is already full")]
    PortfolioFull(String),
    #[error("committee '{0}' is already full")]
    CommitteeFull(String),
    #[error("a {0} registration cannot be allocated")]
    NotAllocatable(RegistrationStatus),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub async fn insert_registration<'e, E>(
    executor: E,
    user_id: &str,
    new: &NewRegistration,
) -> Result<Registration, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let id = uuid::Uuid::new_v4().to_string();
    let now = now_rfc3339();

    sqlx::query_as::<_, Registration>(
        r#"
        INSERT INTO registrations (
            id, user_id, first_name, last_name, email, phone, institution, grade, city,
            experience, dietary_requirements, emergency_contact_name, emergency_contact_phone,
            committee_preference_1, portfolio_preference_1,
            committee_preference_2, portfolio_preference_2,
            committee_preference_3, portfolio_preference_3,
            id_document_path, mun_resume_path, status, payment_status, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', 'pending', ?, ?)
        RETURNING *
        "#,
    )
    .bind(&id)
    .bind(user_id)
    .bind(new.first_name.trim())
    .bind(new.last_name.trim())
    .bind(new.email.trim().to_lowercase())
    .bind(new.phone.trim())
    .bind(new.institution.trim())
    .bind(&new.grade)
    .bind(&new.city)
    .bind(&new.experience)
    .bind(&new.dietary_requirements)
    .bind(&new.emergency_contact_name)
    .bind(&new.emergency_contact_phone)
    .bind(new.committee_preference_1.trim())
    .bind(new.portfolio_preference_1.trim())
    .bind(&new.committee_preference_2)
    .bind(&new.portfolio_preference_2)
    .bind(&new.committee_preference_3)
    .bind(&new.portfolio_preference_3)
    .bind(&new.id_document_path)
    .bind(&new.mun_resume_path)
    .bind(&now)
    .bind(&now)
    .fetch_one(executor)
    .await
}

pub async fn find_registration(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<Registration>, sqlx::Error> {
    sqlx::query_as::<_, Registration>("SELECT * FROM registrations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_registration_by_user(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Option<Registration>, sqlx::Error> {
    sqlx::query_as::<_, Registration>("SELECT * FROM registrations WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Highest page number; keeps the offset within `i64`
const MAX_PAGE: i64 = i64::MAX / 200;

pub async fn list_registrations(
    pool: &SqlitePool,
    query: &RegistrationQuery,
) -> Result<RegistrationListResponse, sqlx::Error> {
    let page = query.page.unwrap_or(1).clamp(1, MAX_PAGE);
    let per_page = query.per_page.unwrap_or(50).clamp(1, 200);
    let offset = (page - 1) * per_page;

    let mut where_clauses = vec!["1 = 1"];
    let mut params: Vec<String> = Vec::new();

    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        where_clauses.push("status = ?");
        params.push(status.to_lowercase());
    }
    if let Some(payment) = query.payment_status.as_deref().filter(|s| !s.is_empty()) {
        where_clauses.push("payment_status = ?");
        params.push(payment.to_lowercase());
    }
    if let Some(committee) = query.committee.as_deref().filter(|s| !s.is_empty()) {
        where_clauses.push(
            "(allocated_committee = ? COLLATE NOCASE OR committee_preference_1 = ? COLLATE NOCASE)",
        );
        params.push(committee.to_string());
        params.push(committee.to_string());
    }
    if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
        where_clauses.push(
            "(first_name || ' ' || last_name LIKE ? OR email LIKE ? OR institution LIKE ?)",
        );
        let pattern = format!("%{}%", search.trim());
        params.push(pattern.clone());
        params.push(pattern.clone());
        params.push(pattern);
    }

    let where_sql = where_clauses.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM registrations WHERE {}", where_sql);
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
    for p in &params {
        count_query = count_query.bind(p);
    }
    let (total,) = count_query.fetch_one(pool).await?;

    let list_sql = format!(
        "SELECT * FROM registrations WHERE {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        where_sql
    );
    let mut list_query = sqlx::query_as::<_, Registration>(&list_sql);
    for p in &params {
        list_query = list_query.bind(p);
    }
    let registrations = list_query
        .bind(per_page)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    Ok(RegistrationListResponse {
        success: true,
        registrations,
        total,
        page,
        per_page,
        total_pages: (total + per_page - 1) / per_page,
    })
}

/// Decrement seat counters held by an allocation
async fn release_allocation(
    tx: &mut Transaction<'_, Sqlite>,
    committee: Option<&str>,
    portfolio: Option<&str>,
) -> Result<(), sqlx::Error> {
    let Some(committee) = committee else {
        return Ok(());
    };

    sqlx::query(
        "UPDATE committees SET registered = MAX(registered - 1, 0) WHERE name = ? COLLATE NOCASE",
    )
    .bind(committee)
    .execute(&mut **tx)
    .await?;

    if let Some(portfolio) = portfolio {
        sqlx::query(
            r#"
            UPDATE portfolios SET registered = MAX(registered - 1, 0)
            WHERE name = ? COLLATE NOCASE
              AND committee_id = (SELECT id FROM committees WHERE name = ? COLLATE NOCASE)
            "#,
        )
        .bind(portfolio)
        .bind(committee)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<Option<&str>> {
    value.as_deref().map(|v| {
        let v = v.trim();
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    })
}

/// Apply a staff update in one transaction.
///
/// Allocation changes move the committee and portfolio seat counters, and
/// are refused when the target portfolio or committee is full. A committee
/// capacity of 0 means unlimited; portfolios always hold at least one seat.
/// Moving to a terminal status releases the seat.
pub async fn update_registration(
    pool: &SqlitePool,
    id: &str,
    update: &RegistrationUpdate,
) -> Result<Registration, RegistrationError> {
    let mut tx = pool.begin().await?;

    let current = sqlx::query_as::<_, Registration>("SELECT * FROM registrations WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RegistrationError::NotFound)?;

    if let Some(next) = update.status {
        let from = current.status();
        if !from.can_transition_to(next) {
            return Err(RegistrationError::InvalidTransition { from, to: next });
        }
    }
    let status = update.status.unwrap_or_else(|| current.status());

    let mut allocated_committee = current.allocated_committee.clone();
    let mut allocated_portfolio = current.allocated_portfolio.clone();

    let requested_committee = non_empty(&update.allocated_committee);
    let requested_portfolio = non_empty(&update.allocated_portfolio);

    let assigns_seat =
        matches!(requested_committee, Some(Some(_))) || matches!(requested_portfolio, Some(Some(_)));
    if status.is_terminal() && assigns_seat {
        return Err(RegistrationError::NotAllocatable(status));
    }

    if requested_committee.is_some() || requested_portfolio.is_some() {
        let committee_name = match requested_committee {
            Some(c) => c.map(str::to_string),
            None => current.allocated_committee.clone(),
        };
        // A new committee without a portfolio clears the old portfolio
        let portfolio_name = match requested_portfolio {
            Some(p) => p.map(str::to_string),
            None if requested_committee.is_some() => None,
            None => current.allocated_portfolio.clone(),
        };

        let (new_committee, new_portfolio) = match committee_name {
            None => {
                if portfolio_name.is_some() {
                    return Err(RegistrationError::PortfolioWithoutCommittee);
                }
                (None, None)
            }
            Some(name) => {
                let committee: (String, String, i64, i64) = sqlx::query_as(
                    "SELECT id, name, capacity, registered FROM committees WHERE name = ? COLLATE NOCASE",
                )
                .bind(&name)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| RegistrationError::CommitteeNotFound(name.clone()))?;

                let portfolio = match portfolio_name {
                    Some(pname) => {
                        let row: (String, i64, i64) = sqlx::query_as(
                            "SELECT name, capacity, registered FROM portfolios WHERE committee_id = ? AND name = ? COLLATE NOCASE",
                        )
                        .bind(&committee.0)
                        .bind(&pname)
                        .fetch_optional(&mut *tx)
                        .await?
                        .ok_or_else(|| RegistrationError::PortfolioNotFound(pname.clone()))?;
                        Some(row)
                    }
                    None => None,
                };
                (Some(committee), portfolio)
            }
        };

        let same_committee = match (&new_committee, &current.allocated_committee) {
            (Some(c), Some(old)) => c.1.eq_ignore_ascii_case(old),
            (None, None) => true,
            _ => false,
        };
        let same_portfolio = same_committee
            && match (&new_portfolio, &current.allocated_portfolio) {
                (Some(p), Some(old)) => p.0.eq_ignore_ascii_case(old),
                (None, None) => true,
                _ => false,
            };

        if !same_portfolio {
            release_allocation(
                &mut tx,
                current.allocated_committee.as_deref(),
                current.allocated_portfolio.as_deref(),
            )
            .await?;

            if let Some((committee_id, committee_name, capacity, _)) = &new_committee {
                // Re-read after the release; the old seat may have been in this committee
                let (registered,): (i64,) =
                    sqlx::query_as("SELECT registered FROM committees WHERE id = ?")
                        .bind(committee_id)
                        .fetch_one(&mut *tx)
                        .await?;
                if *capacity > 0 && registered >= *capacity {
                    return Err(RegistrationError::CommitteeFull(committee_name.clone()));
                }

                if let Some((portfolio_name, p_capacity, _)) = &new_portfolio {
                    let (p_registered,): (i64,) = sqlx::query_as(
                        "SELECT registered FROM portfolios WHERE committee_id = ? AND name = ?",
                    )
                    .bind(committee_id)
                    .bind(portfolio_name)
                    .fetch_one(&mut *tx)
                    .await?;
                    if p_registered >= *p_capacity {
                        return Err(RegistrationError::PortfolioFull(portfolio_name.clone()));
                    }

                    sqlx::query(
                        "UPDATE portfolios SET registered = registered + 1 WHERE committee_id = ? AND name = ?",
                    )
                    .bind(committee_id)
                    .bind(portfolio_name)
                    .execute(&mut *tx)
                    .await?;
                }

                sqlx::query("UPDATE committees SET registered = registered + 1 WHERE id = ?")
                    .bind(committee_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        allocated_committee = new_committee.map(|c| c.1);
        allocated_portfolio = new_portfolio.map(|p| p.0);
    }

    // Rejected and cancelled delegates give their seat back
    if status.is_terminal() && allocated_committee.is_some() {
        release_allocation(
            &mut tx,
            allocated_committee.as_deref(),
            allocated_portfolio.as_deref(),
        )
        .await?;
        allocated_committee = None;
        allocated_portfolio = None;
    }

    let payment_status = update
        .payment_status
        .unwrap_or_else(|| current.payment_status());
    let admin_notes = update.admin_notes.clone().or(current.admin_notes.clone());

    let updated = sqlx::query_as::<_, Registration>(
        r#"
        UPDATE registrations SET
            status = ?,
            payment_status = ?,
            allocated_committee = ?,
            allocated_portfolio = ?,
            admin_notes = ?,
            updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(status.as_str())
    .bind(payment_status.as_str())
    .bind(&allocated_committee)
    .bind(&allocated_portfolio)
    .bind(&admin_notes)
    .bind(now_rfc3339())
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(updated)
}

/// Delete a registration, releasing its seat. Returns the removed row so
/// the caller can clean up uploaded documents.
pub async fn delete_registration(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<Registration>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let Some(existing) =
        sqlx::query_as::<_, Registration>("SELECT * FROM registrations WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
    else {
        return Ok(None);
    };

    release_allocation(
        &mut tx,
        existing.allocated_committee.as_deref(),
        existing.allocated_portfolio.as_deref(),
    )
    .await?;

    sqlx::query("DELETE FROM registrations WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Some(existing))
}
