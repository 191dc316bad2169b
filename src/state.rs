//! Shared state handed to every axum handler (§10.7).
//!
//! Unlike the teacher's `AppState`, which aggregates a dozen independently
//! optional device controllers, this system's web surface only ever needs
//! two things: the static configuration and the one `Coordinator` that
//! owns everything else.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::coordinator::Coordinator;

pub struct AppState {
    pub config: Arc<AppConfig>,
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, coordinator: Arc<Coordinator>) -> Arc<Self> {
        Arc::new(Self { config, coordinator })
    }
}
