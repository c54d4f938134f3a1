use std::sync::Arc;

use crate::service::CollabService;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Session registry, admission set and collaborators
    pub service: Arc<CollabService>,
}

impl AppState {
    pub fn new(service: CollabService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}
