pub mod api;
pub mod config;
pub mod db;
pub mod notifications;
pub mod uploads;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::notifications::{Mailer, SmtpMailer};
use crate::uploads::DocumentStore;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub mailer: Arc<dyn Mailer>,
    pub documents: DocumentStore,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::new(config.email.clone()));
        Self::with_mailer(config, db, mailer)
    }

    /// Build state around a specific mail transport
    pub fn with_mailer(config: Config, db: DbPool, mailer: Arc<dyn Mailer>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let documents = DocumentStore::new(&config.uploads);
        Self {
            config,
            db,
            mailer,
            documents,
            rate_limiter,
        }
    }
}
