pub mod auth;
pub mod calendar;
pub mod config;

use outdial_core::Config;

/// The acting user id; every backend endpoint is addressed per user.
pub(crate) fn require_user_id(config: &Config) -> Result<String, Box<dyn std::error::Error>> {
    config
        .api
        .user_id
        .clone()
        .ok_or_else(|| "no user id configured; run `outdial config set api.user_id <id>`".into())
}
