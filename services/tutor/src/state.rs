//! Shared Application State

use crate::config::Config;
use std::sync::Arc;
use tutor_core::session::SessionController;

/// Created once at startup and shared by the REPL and its driver tasks.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SessionController>,
    pub config: Arc<Config>,
    /// Human-readable name of the backend, shown by `/status`.
    pub backend: String,
}
