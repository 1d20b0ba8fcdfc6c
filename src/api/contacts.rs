use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::{AdminUser, StaffUser};
use super::error::ApiError;
use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::validation::{validate_contact, validate_optional_length, MAX_TEXT_LEN};
use crate::db::{self, ContactQuery, ContactStatus, CreateContactRequest, UpdateContactRequest};
use crate::AppState;

pub async fn create_contact(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateContactRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    validate_contact(&req)?;

    let contact = db::insert_contact(&state.db, &req).await?;
    tracing::info!(contact_id = %contact.id, subject = %contact.subject, "Contact message received");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Thank you for reaching out. We will get back to you soon.",
            "contact": contact,
        })),
    ))
}

pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
    StaffUser(_): StaffUser,
    ApiQuery(query): ApiQuery<ContactQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => Some(
            s.parse::<ContactStatus>()
                .map_err(|e| ApiError::validation_field("status", e))?,
        ),
        None => None,
    };

    let contacts = db::list_contacts(&state.db, status).await?;
    Ok(Json(json!({
        "success": true,
        "total": contacts.len(),
        "contacts": contacts,
    })))
}

pub async fn update_contact(
    State(state): State<Arc<AppState>>,
    StaffUser(staff): StaffUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<UpdateContactRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_optional_length("Notes", &req.notes, MAX_TEXT_LEN)
        .map_err(|e| ApiError::validation_field("notes", e))?;

    let contact = db::update_contact(&state.db, &id, &req)
        .await?
        .ok_or_else(|| ApiError::not_found("Contact not found"))?;

    tracing::info!(contact_id = %id, status = %contact.status, by = %staff.user_id, "Contact updated");
    Ok(Json(json!({ "success": true, "contact": contact })))
}

pub async fn delete_contact(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<Value>, ApiError> {
    if !db::delete_contact(&state.db, &id).await? {
        return Err(ApiError::not_found("Contact not found"));
    }
    Ok(Json(json!({ "success": true, "message": "Contact deleted" })))
}
