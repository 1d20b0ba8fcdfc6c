use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::AdminUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::ApiJson;
use super::validation::{validate_optional_length, MAX_TEXT_LEN};
use crate::db::{self, UpdatePopupRequest};
use crate::AppState;

/// Landing-page announcement
pub async fn get_popup(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let popup = db::get_or_init_popup(&state.db).await?;
    Ok(Json(json!({ "success": true, "popup": popup })))
}

pub async fn update_popup(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    ApiJson(req): ApiJson<UpdatePopupRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("title", validate_optional_length("Title", &req.title, 200))
        .check("message", validate_optional_length("Message", &req.message, MAX_TEXT_LEN))
        .check("ctaText", validate_optional_length("Button text", &req.cta_text, 100));
    for (field, url) in [("imageUrl", &req.image_url), ("ctaLink", &req.cta_link)] {
        if let Some(url) = url.as_deref().filter(|u| !u.is_empty()) {
            if !(url.starts_with('/') || url.starts_with("http://") || url.starts_with("https://")) {
                errors.add(field, "Link must be an absolute URL or a site path");
            }
        }
    }
    errors.finish()?;

    let popup = db::update_popup(&state.db, &req).await?;
    tracing::info!(enabled = popup.enabled, by = %admin.user_id, "Popup updated");

    Ok(Json(json!({ "success": true, "popup": popup })))
}
