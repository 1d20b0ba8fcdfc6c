pub mod auth;
mod committees;
mod contacts;
mod dashboard;
pub mod error;
mod extract;
pub mod health;
mod popups;
mod pricing;
pub mod rate_limit;
mod registrations;
mod validation;

#[cfg(test)]
mod tests;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{get, post, put},
    Router,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use self::error::ApiError;
use crate::AppState;

/// Multipart overhead allowed on top of the two document parts
const FORM_OVERHEAD_BYTES: usize = 256 * 1024;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60))
}

async fn api_not_found() -> ApiError {
    ApiError::not_found("Endpoint not found")
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let limited = middleware::from_fn_with_state(state.clone(), rate_limit::rate_limit_public);

    let auth_routes = Router::new()
        .route("/register", post(auth::register).layer(limited.clone()))
        .route("/login", post(auth::login).layer(limited.clone()))
        .merge(
            Router::new()
                .route("/logout", post(auth::logout))
                .route("/me", get(auth::me))
                .route("/profile", put(auth::update_profile))
                .route("/password", put(auth::change_password))
                .route_layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth::auth_middleware,
                )),
        );

    // Reads are public; writes check for an admin in the handler
    let committee_routes = Router::new()
        .route(
            "/",
            get(committees::list_committees).post(committees::create_committee),
        )
        .route(
            "/:id",
            get(committees::get_committee)
                .put(committees::update_committee)
                .delete(committees::delete_committee),
        )
        .route(
            "/:id/portfolios",
            get(committees::list_portfolios).post(committees::add_portfolio),
        )
        .route(
            "/:id/portfolios/:portfolio_id",
            put(committees::update_portfolio).delete(committees::remove_portfolio),
        );

    let max_form_bytes = state.documents.max_bytes() * 2 + FORM_OVERHEAD_BYTES;
    let registration_routes = Router::new()
        .route(
            "/",
            post(registrations::create_registration)
                .layer::<_, Infallible>(limited.clone())
                .layer(DefaultBodyLimit::max(max_form_bytes)),
        )
        .route("/", get(registrations::list_registrations))
        .route("/me", get(registrations::my_registration))
        .route(
            "/:id",
            get(registrations::get_registration).delete(registrations::delete_registration),
        )
        .route("/:id/status", put(registrations::update_status))
        .route("/:id/allocation", put(registrations::update_allocation))
        .route("/:id/payment", put(registrations::update_payment));

    let contact_routes = Router::new()
        .route("/", post(contacts::create_contact).layer(limited))
        .route("/", get(contacts::list_contacts))
        .route(
            "/:id",
            put(contacts::update_contact).delete(contacts::delete_contact),
        );

    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/database", get(health::database))
        .route("/payment", get(health::payment))
        .route("/email", get(health::email));

    let api_routes = Router::new()
        .nest("/auth", auth_routes)
        .nest("/committees", committee_routes)
        .nest("/registrations", registration_routes)
        .nest("/contacts", contact_routes)
        .route("/dashboard/stats", get(dashboard::stats))
        .route(
            "/pricing",
            get(pricing::get_pricing).put(pricing::update_pricing),
        )
        .route("/popup", get(popups::get_popup).put(popups::update_popup))
        .nest("/health", health_routes)
        .fallback(api_not_found);

    Router::new()
        .nest("/api", api_routes)
        .nest_service("/uploads", ServeDir::new(state.documents.dir()))
        .layer(cors_layer(&state.config.server.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
