//! Request middleware.

pub mod cron_auth;

pub use cron_auth::{bearer_token, require_cron_secret};
