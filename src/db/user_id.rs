//! Human-readable delegate ids of the form `KMUN25###`.

use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use sqlx::SqlitePool;
use thiserror::Error;

pub const USER_ID_PREFIX: &str = "KMUN25";

/// Draws before giving up. The id space holds 900 values, so this is
/// enough to find a free one with near certainty until the space is
/// almost full.
pub const MAX_USER_ID_ATTEMPTS: usize = 2000;

lazy_static! {
    static ref USER_ID_REGEX: Regex = Regex::new(r"^KMUN25\d{3}$").unwrap();
}

#[derive(Debug, Error)]
pub enum UserIdError {
    #[error("no free user id found after {0} attempts")]
    Exhausted(usize),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub fn is_valid_user_id(id: &str) -> bool {
    USER_ID_REGEX.is_match(id)
}

fn random_candidate() -> String {
    let n: u16 = rand::rng().random_range(100..=999);
    format!("{}{}", USER_ID_PREFIX, n)
}

/// Generate a user id that is not present in the `users` table.
///
/// Collision-avoiding only; the ids are not meant to be unpredictable.
pub async fn generate_user_id(pool: &SqlitePool) -> Result<String, UserIdError> {
    generate_user_id_bounded(pool, MAX_USER_ID_ATTEMPTS).await
}

pub(crate) async fn generate_user_id_bounded(
    pool: &SqlitePool,
    max_attempts: usize,
) -> Result<String, UserIdError> {
    for _ in 0..max_attempts {
        let candidate = random_candidate();
        let taken: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE user_id = ?")
            .bind(&candidate)
            .fetch_optional(pool)
            .await?;
        if taken.is_none() {
            return Ok(candidate);
        }
    }

    tracing::error!(max_attempts, "User id space exhausted");
    Err(UserIdError::Exhausted(max_attempts))
}
