use std::sync::Arc;

use crate::auth::TokenRegistry;
use crate::config::Config;
use crate::engine::Engine;
use crate::store::MemoryStore;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub engine: Arc<Engine>,
    pub tokens: Arc<TokenRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(Engine::with_policy(
            Arc::clone(&store),
            config.retry_policy(),
        ));
        let tokens = Arc::new(TokenRegistry::from_secrets(config.api_tokens.clone()));

        Self {
            store,
            engine,
            tokens,
            config: Arc::new(config),
        }
    }
}
