//! Database models split into domain-specific modules.

pub mod committee;
pub mod common;
pub mod contact;
pub mod portfolio;
pub mod registration;
pub mod settings;
pub mod stats;
pub mod user;

pub use committee::*;
pub use common::*;
pub use contact::*;
pub use portfolio::*;
pub use registration::*;
pub use settings::*;
pub use stats::*;
pub use user::*;
