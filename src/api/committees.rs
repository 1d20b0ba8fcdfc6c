use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::AdminUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::extract::{ApiJson, ApiPath};
use super::validation::{
    validate_capacity, validate_optional_length, validate_portfolio_capacity, validate_required,
    MAX_NAME_LEN, MAX_TEXT_LEN,
};
use crate::db::{
    self, CreateCommitteeRequest, NewPortfolio, PortfolioUpdate, UpdateCommitteeRequest,
};
use crate::AppState;

fn validate_committee_fields(
    name: Option<&str>,
    description: Option<&str>,
    capacity: Option<i64>,
) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = name {
        errors.check("name", validate_required("Committee name", name, MAX_NAME_LEN));
    }
    errors.check(
        "description",
        validate_optional_length("Description", &description.map(str::to_string), MAX_TEXT_LEN),
    );
    if let Some(capacity) = capacity {
        errors.check("capacity", validate_capacity(capacity));
    }
    errors.finish()
}

fn validate_portfolio_fields(
    name: Option<&str>,
    capacity: Option<i64>,
    registered: Option<i64>,
) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = name {
        errors.check("name", validate_required("Portfolio name", name, MAX_NAME_LEN));
    }
    if let Some(capacity) = capacity {
        errors.check("capacity", validate_portfolio_capacity(capacity));
    }
    if registered.is_some_and(|r| r < 0) {
        errors.add("registered", "Registered count cannot be negative");
    }
    errors.finish()
}

pub async fn list_committees(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let committees = db::list_committees(&state.db).await?;
    Ok(Json(json!({ "success": true, "committees": committees })))
}

pub async fn get_committee(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<Value>, ApiError> {
    let committee = db::get_committee(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Committee not found"))?;
    Ok(Json(json!({ "success": true, "committee": committee })))
}

pub async fn create_committee(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    ApiJson(req): ApiJson<CreateCommitteeRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    validate_committee_fields(Some(&req.name), Some(&req.description), Some(req.capacity))?;

    if db::find_committee_by_name(&state.db, &req.name).await?.is_some() {
        return Err(ApiError::conflict("A committee with this name already exists"));
    }

    let committee = db::create_committee(&state.db, &req).await?;
    tracing::info!(committee = %committee.name, by = %admin.user_id, "Committee created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "committee": committee })),
    ))
}

pub async fn update_committee(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<UpdateCommitteeRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_committee_fields(req.name.as_deref(), req.description.as_deref(), req.capacity)?;

    let committee = db::update_committee(&state.db, &id, &req).await?;
    tracing::info!(
        committee = %committee.name,
        version = committee.version,
        by = %admin.user_id,
        "Committee updated"
    );

    Ok(Json(json!({ "success": true, "committee": committee })))
}

pub async fn delete_committee(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<Value>, ApiError> {
    if !db::delete_committee(&state.db, &id).await? {
        return Err(ApiError::not_found("Committee not found"));
    }
    tracing::info!(committee_id = %id, by = %admin.user_id, "Committee deleted");
    Ok(Json(json!({ "success": true, "message": "Committee deleted" })))
}

pub async fn list_portfolios(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<String>,
) -> Result<Json<Value>, ApiError> {
    let portfolios = db::list_portfolios(&state.db, &id).await?;
    Ok(Json(json!({ "success": true, "portfolios": portfolios })))
}

pub async fn add_portfolio(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<NewPortfolio>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    validate_portfolio_fields(Some(&req.name), Some(req.capacity), None)?;

    let portfolio = db::add_portfolio(&state.db, &id, &req).await?;
    tracing::info!(committee_id = %id, portfolio = %portfolio.name, "Portfolio added");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "portfolio": portfolio })),
    ))
}

pub async fn update_portfolio(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    ApiPath((id, portfolio_id)): ApiPath<(String, String)>,
    ApiJson(req): ApiJson<PortfolioUpdate>,
) -> Result<Json<Value>, ApiError> {
    validate_portfolio_fields(req.name.as_deref(), req.capacity, req.registered)?;

    let portfolio = db::update_portfolio(&state.db, &id, &portfolio_id, &req).await?;
    Ok(Json(json!({ "success": true, "portfolio": portfolio })))
}

pub async fn remove_portfolio(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    ApiPath((id, portfolio_id)): ApiPath<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let removed = db::remove_portfolio(&state.db, &id, &portfolio_id).await?;
    if removed {
        tracing::info!(committee_id = %id, portfolio_id = %portfolio_id, "Portfolio removed");
    }
    Ok(Json(json!({ "success": true, "removed": removed })))
}
