use std::sync::Arc;

use crate::config::ServerConfig;

/// Shared, read-only handler state: the endpoint limits.
#[derive(Clone)]
pub struct AppState {
    pub limits: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(limits: ServerConfig) -> Self {
        Self {
            limits: Arc::new(limits),
        }
    }
}
