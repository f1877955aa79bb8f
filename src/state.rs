use std::sync::Arc;

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::{PgPool, PgPooledConnection},
    error::{AppError, AppResult},
    storage::ObjectStorage,
    workflow::labels::VersionLabeler,
};

/// Shared handles for request handlers. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub jwt: JwtService,
    /// Labeler configured with the tenant-wide prototype overflow policy.
    pub labeler: VersionLabeler,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        jwt: JwtService,
    ) -> Self {
        Self {
            labeler: VersionLabeler::new(config.prototype_label_overflow),
            pool,
            config: Arc::new(config),
            storage,
            jwt,
        }
    }

    /// Checks a connection out of the pool; exhaustion surfaces as a 500.
    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("no database connection available: {err}")))
    }
}
