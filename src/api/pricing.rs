use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::AdminUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::ApiJson;
use crate::db::{self, UpdatePricingRequest};
use crate::AppState;

/// Current pricing, with the fee that applies right now
pub async fn get_pricing(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let pricing = db::get_or_init_pricing(&state.db).await?;
    let current_fee = pricing.current_fee(chrono::Utc::now());
    Ok(Json(json!({
        "success": true,
        "pricing": pricing,
        "currentFee": current_fee,
    })))
}

fn validate_pricing(req: &UpdatePricingRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Some(currency) = &req.currency {
        let valid = currency.len() == 3 && currency.chars().all(|c| c.is_ascii_alphabetic());
        if !valid {
            errors.add("currency", "Currency must be a 3-letter ISO code");
        }
    }
    for (field, fee) in [
        ("delegateFee", req.delegate_fee),
        ("earlyBirdFee", req.early_bird_fee),
        ("delegationFee", req.delegation_fee),
        ("accommodationFee", req.accommodation_fee),
    ] {
        if fee.is_some_and(|f| f < 0) {
            errors.add(field, "Fee cannot be negative");
        }
    }
    if let Some(deadline) = req.early_bird_deadline.as_deref().filter(|d| !d.is_empty()) {
        if chrono::DateTime::parse_from_rfc3339(deadline).is_err() {
            errors.add("earlyBirdDeadline", "Deadline must be an RFC 3339 timestamp");
        }
    }

    errors.finish()
}

pub async fn update_pricing(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    ApiJson(mut req): ApiJson<UpdatePricingRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_pricing(&req)?;
    if let Some(currency) = req.currency.as_mut() {
        *currency = currency.to_uppercase();
    }

    let pricing = db::update_pricing(&state.db, &req).await?;
    tracing::info!(by = %admin.user_id, "Pricing updated");

    let current_fee = pricing.current_fee(chrono::Utc::now());
    Ok(Json(json!({
        "success": true,
        "pricing": pricing,
        "currentFee": current_fee,
    })))
}
