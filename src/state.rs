use crate::config::Config;
use crate::directory::AccountDirectory;
use crate::storage::ObjectStore;
use std::sync::Arc;

/// Shared per-request capabilities. Everything the handler touches is
/// injected here; nothing is reached through ambient globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub directory: Arc<dyn AccountDirectory>,
    /// `None` when no bucket is bound; uploads then fail with a
    /// configuration error.
    pub store: Option<Arc<dyn ObjectStore>>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        directory: Arc<dyn AccountDirectory>,
        store: Option<Arc<dyn ObjectStore>>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            config,
            directory,
            store,
            http_client,
        }
    }
}
