//! Application state shared across handlers.

use crate::auth::AuthService;
use crate::db::Database;
use crate::sync::ProgressReconciler;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Progress reconciler over the database.
    pub progress: Arc<ProgressReconciler<Database>>,
}

impl AppState {
    /// Create application state over the progress database.
    pub fn new(db: Database, auth: AuthService) -> Self {
        Self {
            auth: Arc::new(auth),
            progress: Arc::new(ProgressReconciler::new(db)),
        }
    }
}
