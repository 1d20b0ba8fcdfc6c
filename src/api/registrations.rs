//! Registration submission and the staff workflow around it.

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::{
    authenticate, hash_password, issue_token, temp_password, AdminUser, StaffUser,
};
use super::error::ApiError;
use super::extract::{ApiJson, ApiPath, ApiQuery};
use super::validation::{validate_optional_length, validate_registration, MAX_TEXT_LEN};
use crate::db::{
    self, NewRegistration, NewUser, PaymentStatus, Registration, RegistrationListResponse,
    RegistrationQuery, RegistrationStatus, RegistrationUpdate, Role, User,
};
use crate::notifications::{
    render_allocation_email, render_registration_email, Delivery, OutgoingEmail,
};
use crate::uploads::{DocumentKind, UploadError};
use crate::AppState;

/// A file part held in memory until the form has been validated
struct PendingUpload {
    kind: DocumentKind,
    file_name: String,
    data: Bytes,
}

fn optional(value: String) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Copy a text part into the form; unknown fields are ignored
fn set_form_field(form: &mut NewRegistration, name: &str, value: String) {
    match name {
        "firstName" => form.first_name = value.trim().to_string(),
        "lastName" => form.last_name = value.trim().to_string(),
        "email" => form.email = value.trim().to_lowercase(),
        "phone" => form.phone = value.trim().to_string(),
        "institution" => form.institution = value.trim().to_string(),
        "grade" => form.grade = optional(value),
        "city" => form.city = optional(value),
        "experience" => form.experience = optional(value),
        "dietaryRequirements" => form.dietary_requirements = optional(value),
        "emergencyContactName" => form.emergency_contact_name = optional(value),
        "emergencyContactPhone" => form.emergency_contact_phone = optional(value),
        "committeePreference1" => form.committee_preference_1 = value.trim().to_string(),
        "portfolioPreference1" => form.portfolio_preference_1 = value.trim().to_string(),
        "committeePreference2" => form.committee_preference_2 = optional(value),
        "portfolioPreference2" => form.portfolio_preference_2 = optional(value),
        "committeePreference3" => form.committee_preference_3 = optional(value),
        "portfolioPreference3" => form.portfolio_preference_3 = optional(value),
        other => tracing::debug!(field = %other, "Ignoring unknown registration field"),
    }
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    tracing::debug!("Rejected multipart body: {}", err);
    ApiError::bad_request("Invalid multipart form data")
}

async fn read_form(
    state: &AppState,
    multipart: &mut Multipart,
) -> Result<(NewRegistration, Vec<PendingUpload>), ApiError> {
    let mut form = NewRegistration::default();
    let mut uploads = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if let Some(kind) = DocumentKind::from_field(&name) {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let data = field.bytes().await.map_err(multipart_error)?;
            // Browsers send an empty part for an untouched file input
            if data.is_empty() && file_name.is_empty() {
                continue;
            }
            if data.len() > state.documents.max_bytes() {
                return Err(UploadError::TooLarge(state.documents.max_bytes()).into());
            }
            state.documents.check_extension(&file_name)?;
            uploads.retain(|u: &PendingUpload| u.kind != kind);
            uploads.push(PendingUpload {
                kind,
                file_name,
                data,
            });
            continue;
        }

        let value = field.text().await.map_err(multipart_error)?;
        set_form_field(&mut form, &name, value);
    }

    Ok((form, uploads))
}

/// Send a notification; failures are logged and reported as not sent
async fn deliver(state: &AppState, email: OutgoingEmail) -> bool {
    let to = email.to.clone();
    match state.mailer.send(email).await {
        Ok(Delivery::Sent) => true,
        Ok(Delivery::Skipped) => false,
        Err(e) => {
            tracing::warn!(to = %to, error = %e, "Failed to send email");
            false
        }
    }
}

async fn remove_documents(state: &AppState, paths: &[&str]) {
    for path in paths {
        state.documents.remove(path).await;
    }
}

/// Public multipart submission.
///
/// Creates the applicant's account when the email is new and returns its
/// temporary password and a session token. A registration for an existing
/// account is only accepted from a caller signed in as that account, and
/// never for staff accounts.
pub async fn create_registration(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut multipart = multipart?;
    let pricing = db::get_or_init_pricing(&state.db).await?;
    if !pricing.registration_open {
        return Err(ApiError::forbidden("Registrations are currently closed"));
    }

    let (mut form, uploads) = read_form(&state, &mut multipart).await?;
    validate_registration(&form)?;

    let existing = db::find_user_by_email(&state.db, &form.email).await?;
    if let Some(user) = &existing {
        if user.role().is_staff() {
            tracing::warn!(email = %form.email, "Registration submitted with a staff account email");
            return Err(ApiError::forbidden(
                "Staff accounts cannot submit a delegate registration",
            ));
        }
        let signed_in_as_owner = authenticate(&state, &headers)
            .await
            .is_ok_and(|caller| caller.id == user.id);
        if !signed_in_as_owner {
            return Err(ApiError::conflict(
                "An account with this email already exists. Log in to submit your registration.",
            ));
        }
        if db::find_registration_by_user(&state.db, &user.id)
            .await?
            .is_some()
        {
            return Err(ApiError::conflict(
                "A registration already exists for this email",
            ));
        }
    }

    // Account fields are prepared outside the transaction
    let new_account = match existing {
        Some(_) => None,
        None => {
            let password = temp_password(&form.first_name);
            let password_hash = hash_password(&password).map_err(|e| {
                tracing::error!("Failed to hash password: {}", e);
                ApiError::internal("Failed to process password")
            })?;
            let user_id = db::generate_user_id(&state.db).await?;
            Some((
                password,
                NewUser {
                    user_id,
                    first_name: form.first_name.clone(),
                    last_name: form.last_name.clone(),
                    email: form.email.clone(),
                    phone: Some(form.phone.clone()),
                    password_hash,
                    role: Role::Delegate,
                },
            ))
        }
    };

    for upload in &uploads {
        let path = match state
            .documents
            .save(upload.kind, &upload.file_name, &upload.data)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                let saved: Vec<&str> = [&form.id_document_path, &form.mun_resume_path]
                    .into_iter()
                    .filter_map(|p| p.as_deref())
                    .collect();
                remove_documents(&state, &saved).await;
                return Err(e.into());
            }
        };
        match upload.kind {
            DocumentKind::IdDocument => form.id_document_path = Some(path),
            DocumentKind::MunResume => form.mun_resume_path = Some(path),
        }
    }

    let stored = async {
        let mut tx = state.db.begin().await?;
        let user = match (&existing, &new_account) {
            (Some(user), _) => user.clone(),
            (None, Some((_, new_user))) => db::insert_user(&mut *tx, new_user).await?,
            (None, None) => return Err(ApiError::internal("Account could not be prepared")),
        };
        let registration = db::insert_registration(&mut *tx, &user.id, &form).await?;
        tx.commit().await?;
        Ok::<(User, Registration), ApiError>((user, registration))
    }
    .await;

    let (user, registration) = match stored {
        Ok(stored) => stored,
        Err(e) => {
            let saved: Vec<&str> = [&form.id_document_path, &form.mun_resume_path]
                .into_iter()
                .filter_map(|p| p.as_deref())
                .collect();
            remove_documents(&state, &saved).await;
            return Err(e);
        }
    };

    tracing::info!(
        user_id = %user.user_id,
        registration_id = %registration.id,
        committee = %registration.committee_preference_1,
        new_account = new_account.is_some(),
        "Registration submitted"
    );

    // Existing accounts are already signed in
    let token = match &new_account {
        Some(_) => Some(issue_token(&state.config.auth, &user)?),
        None => None,
    };
    let email_sent = deliver(
        &state,
        render_registration_email(&registration, &user.user_id),
    )
    .await;

    let mut user_json = json!({
        "id": user.id,
        "userId": user.user_id,
        "email": user.email,
        "firstName": user.first_name,
        "lastName": user.last_name,
        "role": user.role,
    });
    if let Some((password, _)) = &new_account {
        user_json["tempPassword"] = json!(password);
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Registration submitted successfully",
            "registration": registration,
            "user": user_json,
            "token": token,
            "emailSent": email_sent,
        })),
    ))
}

pub async fn list_registrations(
    State(state): State<Arc<AppState>>,
    StaffUser(_): StaffUser,
    ApiQuery(query): ApiQuery<RegistrationQuery>,
) -> Result<Json<RegistrationListResponse>, ApiError> {
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        status
            .parse::<RegistrationStatus>()
            .map_err(|e| ApiError::validation_field("status", e))?;
    }
    if let Some(payment) = query.payment_status.as_deref().filter(|s| !s.is_empty()) {
        payment
            .parse::<PaymentStatus>()
            .map_err(|e| ApiError::validation_field("paymentStatus", e))?;
    }

    Ok(Json(db::list_registrations(&state.db, &query).await?))
}

pub async fn my_registration(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<Value>, ApiError> {
    let registration = db::find_registration_by_user(&state.db, &user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("No registration found for this account"))?;
    Ok(Json(json!({ "success": true, "registration": registration })))
}

/// Staff see any registration; delegates only their own
pub async fn get_registration(
    State(state): State<Arc<AppState>>,
    user: User,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<Value>, ApiError> {
    let registration = db::find_registration(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Registration not found"))?;

    if registration.user_id != user.id && !user.role().is_staff() {
        return Err(ApiError::forbidden("You can only view your own registration"));
    }

    Ok(Json(json!({ "success": true, "registration": registration })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub status: String,
    pub admin_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRequest {
    /// Empty string clears the allocation
    pub allocated_committee: Option<String>,
    pub allocated_portfolio: Option<String>,
    pub admin_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub payment_status: String,
    pub admin_notes: Option<String>,
}

fn check_notes(notes: &Option<String>) -> Result<(), ApiError> {
    validate_optional_length("Admin notes", notes, MAX_TEXT_LEN)
        .map_err(|e| ApiError::validation_field("adminNotes", e))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    StaffUser(staff): StaffUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<StatusRequest>,
) -> Result<Json<Value>, ApiError> {
    let status: RegistrationStatus = req
        .status
        .parse()
        .map_err(|e: String| ApiError::validation_field("status", e))?;
    check_notes(&req.admin_notes)?;

    let registration = db::update_registration(
        &state.db,
        &id,
        &RegistrationUpdate {
            status: Some(status),
            admin_notes: req.admin_notes,
            ..Default::default()
        },
    )
    .await?;

    tracing::info!(
        registration_id = %id,
        status = %status,
        by = %staff.user_id,
        "Registration status changed"
    );

    Ok(Json(json!({ "success": true, "registration": registration })))
}

fn same_name(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        (None, None) => true,
        _ => false,
    }
}

/// Allocate a committee and portfolio. The applicant is emailed once both
/// are set and the seat actually changed.
pub async fn update_allocation(
    State(state): State<Arc<AppState>>,
    StaffUser(staff): StaffUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<AllocationRequest>,
) -> Result<Json<Value>, ApiError> {
    check_notes(&req.admin_notes)?;
    if req.allocated_committee.is_none() && req.allocated_portfolio.is_none() {
        return Err(ApiError::validation_field(
            "allocatedCommittee",
            "Provide a committee or portfolio to allocate",
        ));
    }

    let previous = db::find_registration(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Registration not found"))?;

    let registration = db::update_registration(
        &state.db,
        &id,
        &RegistrationUpdate {
            allocated_committee: req.allocated_committee,
            allocated_portfolio: req.allocated_portfolio,
            admin_notes: req.admin_notes,
            ..Default::default()
        },
    )
    .await?;

    let changed = !same_name(
        previous.allocated_committee.as_deref(),
        registration.allocated_committee.as_deref(),
    ) || !same_name(
        previous.allocated_portfolio.as_deref(),
        registration.allocated_portfolio.as_deref(),
    );

    tracing::info!(
        registration_id = %id,
        committee = ?registration.allocated_committee,
        portfolio = ?registration.allocated_portfolio,
        by = %staff.user_id,
        "Registration allocated"
    );

    let email_sent = if changed && registration.is_fully_allocated() {
        deliver(&state, render_allocation_email(&registration)).await
    } else {
        false
    };

    Ok(Json(json!({
        "success": true,
        "registration": registration,
        "emailSent": email_sent,
    })))
}

pub async fn update_payment(
    State(state): State<Arc<AppState>>,
    StaffUser(staff): StaffUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<PaymentRequest>,
) -> Result<Json<Value>, ApiError> {
    let payment_status: PaymentStatus = req
        .payment_status
        .parse()
        .map_err(|e: String| ApiError::validation_field("paymentStatus", e))?;
    check_notes(&req.admin_notes)?;

    let registration = db::update_registration(
        &state.db,
        &id,
        &RegistrationUpdate {
            payment_status: Some(payment_status),
            admin_notes: req.admin_notes,
            ..Default::default()
        },
    )
    .await?;

    tracing::info!(
        registration_id = %id,
        payment_status = %payment_status,
        by = %staff.user_id,
        "Payment status changed"
    );

    Ok(Json(json!({ "success": true, "registration": registration })))
}

/// Delete a registration and its uploaded documents. The user account is
/// kept.
pub async fn delete_registration(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<Value>, ApiError> {
    let registration = db::delete_registration(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Registration not found"))?;

    remove_documents(&state, &registration.document_paths()).await;

    tracing::info!(registration_id = %id, by = %admin.user_id, "Registration deleted");
    Ok(Json(json!({ "success": true, "message": "Registration deleted" })))
}
