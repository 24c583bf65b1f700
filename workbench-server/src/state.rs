//! Shared application state for the server.

use std::sync::Arc;

use workbench::Workbench;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub workbench: Arc<Workbench>,
}

impl AppState {
    pub fn new(workbench: Workbench) -> Self {
        Self {
            workbench: Arc::new(workbench),
        }
    }
}
