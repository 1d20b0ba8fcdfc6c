//! Input validation for API requests.
//!
//! Field validators return `Err(message)` with a user-facing message. The
//! request-level validators collect every failing field into one
//! `ValidationErrorBuilder` so the client sees all problems at once.

use lazy_static::lazy_static;
use regex::Regex;

use super::error::{ApiError, ValidationErrorBuilder};
use crate::db::{CreateContactRequest, NewRegistration};

lazy_static! {
    /// Pragmatic email check: local part, @, dotted domain
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?)+$"
    ).unwrap();

    /// Digits with optional leading +, spaces, dashes and parentheses
    static ref PHONE_REGEX: Regex = Regex::new(
        r"^\+?[0-9 ()\-]{7,20}$"
    ).unwrap();

    /// Letters (any script), spaces, apostrophes, dots and hyphens
    static ref NAME_REGEX: Regex = Regex::new(
        r"^[\p{L}][\p{L} .'\-]*$"
    ).unwrap();
}

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_TEXT_LEN: usize = 2000;
pub const MIN_PASSWORD_LEN: usize = 8;

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email address".to_string());
    }
    Ok(())
}

/// Validate a person name; `label` is used in messages
pub fn validate_name(label: &str, name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("{} is required", label));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("{} is too long (max {} characters)", label, MAX_NAME_LEN));
    }
    if !NAME_REGEX.is_match(name) {
        return Err(format!("{} contains invalid characters", label));
    }
    Ok(())
}

pub fn validate_phone(phone: &str) -> Result<(), String> {
    let phone = phone.trim();
    if phone.is_empty() {
        return Err("Phone number is required".to_string());
    }
    if !PHONE_REGEX.is_match(phone) {
        return Err("Invalid phone number".to_string());
    }
    Ok(())
}

/// Optional phone; empty is treated as absent
pub fn validate_optional_phone(phone: &Option<String>) -> Result<(), String> {
    match phone.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() => validate_phone(p),
        _ => Ok(()),
    }
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }
    Ok(())
}

/// Required free text bounded by `max` characters
pub fn validate_required(label: &str, value: &str, max: usize) -> Result<(), String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("{} is required", label));
    }
    if value.chars().count() > max {
        return Err(format!("{} is too long (max {} characters)", label, max));
    }
    Ok(())
}

pub fn validate_optional_length(label: &str, value: &Option<String>, max: usize) -> Result<(), String> {
    match value {
        Some(v) if v.chars().count() > max => {
            Err(format!("{} is too long (max {} characters)", label, max))
        }
        _ => Ok(()),
    }
}

/// Seat counts for committees and portfolios
/// Committee capacity; 0 means unlimited
pub fn validate_capacity(capacity: i64) -> Result<(), String> {
    if !(0..=10_000).contains(&capacity) {
        return Err("Capacity must be between 0 and 10000".to_string());
    }
    Ok(())
}

/// Portfolio capacity; every portfolio holds at least one seat
pub fn validate_portfolio_capacity(capacity: i64) -> Result<(), String> {
    if !(1..=10_000).contains(&capacity) {
        return Err("Portfolio capacity must be between 1 and 10000".to_string());
    }
    Ok(())
}

/// Validate a submitted registration form
pub fn validate_registration(form: &NewRegistration) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    errors
        .check("firstName", validate_name("First name", &form.first_name))
        .check("lastName", validate_name("Last name", &form.last_name))
        .check("email", validate_email(&form.email))
        .check("phone", validate_phone(&form.phone))
        .check(
            "institution",
            validate_required("Institution", &form.institution, 200),
        )
        .check(
            "committeePreference1",
            validate_required("First committee preference", &form.committee_preference_1, MAX_NAME_LEN),
        )
        .check(
            "portfolioPreference1",
            validate_required("First portfolio preference", &form.portfolio_preference_1, MAX_NAME_LEN),
        )
        .check(
            "experience",
            validate_optional_length("Experience", &form.experience, MAX_TEXT_LEN),
        )
        .check(
            "dietaryRequirements",
            validate_optional_length("Dietary requirements", &form.dietary_requirements, 500),
        )
        .check(
            "emergencyContactPhone",
            validate_optional_phone(&form.emergency_contact_phone),
        );

    // A portfolio choice needs its committee
    for (rank, committee, portfolio) in [
        (2, &form.committee_preference_2, &form.portfolio_preference_2),
        (3, &form.committee_preference_3, &form.portfolio_preference_3),
    ] {
        let has_committee = committee.as_deref().is_some_and(|c| !c.trim().is_empty());
        let has_portfolio = portfolio.as_deref().is_some_and(|p| !p.trim().is_empty());
        if has_portfolio && !has_committee {
            errors.add(
                format!("committeePreference{}", rank),
                format!("Committee preference {} is required with its portfolio", rank),
            );
        }
    }

    errors.finish()
}

/// Validate a contact form submission
pub fn validate_contact(req: &CreateContactRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("name", validate_required("Name", &req.name, MAX_NAME_LEN))
        .check("email", validate_email(&req.email))
        .check("phone", validate_optional_phone(&req.phone))
        .check("subject", validate_required("Subject", &req.subject, 200))
        .check("message", validate_required("Message", &req.message, MAX_TEXT_LEN));
    errors.finish()
}
