//! Application state

use sqlx::PgPool;
use std::sync::Arc;

use uxaudit_credits::CreditsService;

use crate::{auth::JwtManager, config::Config};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt: JwtManager,
    pub credits: Arc<CreditsService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt = JwtManager::new(&config.jwt_secret);
        let credits = Arc::new(CreditsService::new(
            pool.clone(),
            config.providers.clone(),
        ));
        Self {
            pool,
            config,
            jwt,
            credits,
        }
    }
}
