use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::JwtValidator;
use crate::broadcast::BroadcastEngine;
use crate::config::Settings;
use crate::connection_manager::ConnectionRegistry;
use crate::router::MessageRouter;
use crate::store::ResourceStore;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub store: Arc<ResourceStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<BroadcastEngine>,
    pub router: Arc<MessageRouter>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let jwt_validator = Arc::new(JwtValidator::new(&settings.auth));
        let store = Arc::new(ResourceStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(BroadcastEngine::new(
            registry.clone(),
            Duration::from_millis(settings.websocket.send_timeout_ms),
        ));
        let router = Arc::new(MessageRouter::new(
            store.clone(),
            registry.clone(),
            broadcaster.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            jwt_validator,
            store,
            registry,
            broadcaster,
            router,
            start_time: Instant::now(),
        }
    }
}
