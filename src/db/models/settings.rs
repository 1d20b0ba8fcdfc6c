//! Single-row site settings: pricing and the landing-page popup.
//!
//! Both tables hold at most one row (`id = 1`). Reads go through
//! get-or-initialize, which inserts the default row with
//! `ON CONFLICT DO NOTHING`, so concurrent first requests settle on the
//! same row.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::now_rfc3339;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    #[serde(skip)]
    pub id: i64,
    pub currency: String,
    pub delegate_fee: i64,
    pub early_bird_fee: Option<i64>,
    pub early_bird_deadline: Option<String>,
    pub delegation_fee: Option<i64>,
    pub accommodation_fee: Option<i64>,
    pub registration_open: bool,
    pub updated_at: String,
}

impl Pricing {
    /// Fee that applies at `now` given the early-bird window
    pub fn current_fee(&self, now: chrono::DateTime<chrono::Utc>) -> i64 {
        match (self.early_bird_fee, self.early_bird_deadline.as_deref()) {
            (Some(fee), Some(deadline)) => match chrono::DateTime::parse_from_rfc3339(deadline) {
                Ok(deadline) if now <= deadline.with_timezone(&chrono::Utc) => fee,
                _ => self.delegate_fee,
            },
            _ => self.delegate_fee,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePricingRequest {
    pub currency: Option<String>,
    pub delegate_fee: Option<i64>,
    pub early_bird_fee: Option<i64>,
    pub early_bird_deadline: Option<String>,
    pub delegation_fee: Option<i64>,
    pub accommodation_fee: Option<i64>,
    pub registration_open: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Popup {
    #[serde(skip)]
    pub id: i64,
    pub enabled: bool,
    pub title: String,
    pub message: String,
    pub image_url: Option<String>,
    pub cta_text: Option<String>,
    pub cta_link: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePopupRequest {
    pub enabled: Option<bool>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub image_url: Option<String>,
    pub cta_text: Option<String>,
    pub cta_link: Option<String>,
}

pub async fn get_or_init_pricing(pool: &SqlitePool) -> Result<Pricing, sqlx::Error> {
    sqlx::query("INSERT INTO pricing (id, updated_at) VALUES (1, ?) ON CONFLICT(id) DO NOTHING")
        .bind(now_rfc3339())
        .execute(pool)
        .await?;
    sqlx::query_as::<_, Pricing>("SELECT * FROM pricing WHERE id = 1")
        .fetch_one(pool)
        .await
}

pub async fn update_pricing(
    pool: &SqlitePool,
    req: &UpdatePricingRequest,
) -> Result<Pricing, sqlx::Error> {
    get_or_init_pricing(pool).await?;
    sqlx::query_as::<_, Pricing>(
        r#"
        UPDATE pricing SET
            currency = COALESCE(?, currency),
            delegate_fee = COALESCE(?, delegate_fee),
            early_bird_fee = COALESCE(?, early_bird_fee),
            early_bird_deadline = COALESCE(?, early_bird_deadline),
            delegation_fee = COALESCE(?, delegation_fee),
            accommodation_fee = COALESCE(?, accommodation_fee),
            registration_open = COALESCE(?, registration_open),
            updated_at = ?
        WHERE id = 1
        RETURNING *
        "#,
    )
    .bind(&req.currency)
    .bind(req.delegate_fee)
    .bind(req.early_bird_fee)
    .bind(&req.early_bird_deadline)
    .bind(req.delegation_fee)
    .bind(req.accommodation_fee)
    .bind(req.registration_open)
    .bind(now_rfc3339())
    .fetch_one(pool)
    .await
}

pub async fn get_or_init_popup(pool: &SqlitePool) -> Result<Popup, sqlx::Error> {
    sqlx::query("INSERT INTO popups (id, updated_at) VALUES (1, ?) ON CONFLICT(id) DO NOTHING")
        .bind(now_rfc3339())
        .execute(pool)
        .await?;
    sqlx::query_as::<_, Popup>("SELECT * FROM popups WHERE id = 1")
        .fetch_one(pool)
        .await
}

pub async fn update_popup(
    pool: &SqlitePool,
    req: &UpdatePopupRequest,
) -> Result<Popup, sqlx::Error> {
    get_or_init_popup(pool).await?;
    sqlx::query_as::<_, Popup>(
        r#"
        UPDATE popups SET
            enabled = COALESCE(?, enabled),
            title = COALESCE(?, title),
            message = COALESCE(?, message),
            image_url = COALESCE(?, image_url),
            cta_text = COALESCE(?, cta_text),
            cta_link = COALESCE(?, cta_link),
            updated_at = ?
        WHERE id = 1
        RETURNING *
        "#,
    )
    .bind(req.enabled)
    .bind(&req.title)
    .bind(&req.message)
    .bind(&req.image_url)
    .bind(&req.cta_text)
    .bind(&req.cta_link)
    .bind(now_rfc3339())
    .fetch_one(pool)
    .await
}
