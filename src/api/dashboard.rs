use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::StaffUser;
use super::error::ApiError;
use crate::db;
use crate::AppState;

/// Registration, allocation and inbox counts for the staff dashboards
pub async fn stats(
    State(state): State<Arc<AppState>>,
    StaffUser(_): StaffUser,
) -> Result<Json<Value>, ApiError> {
    let stats = db::dashboard_stats(&state.db).await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}
