//! Application state.

use courier_config::{RealtimeConfig, ServiceConfig};
use courier_core::JobStore;
use courier_queue::{ClaimEngine, EngineConfig};
use courier_realtime::{Broadcaster, ConnectionRegistry, NotificationBridge};
use std::sync::Arc;

use crate::auth::AdminToken;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ClaimEngine>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub realtime: Arc<RealtimeConfig>,
    pub admin: Arc<AdminToken>,
}

impl AppState {
    /// Wire the claim engine and the broadcast layer around `store`.
    ///
    /// Job lifecycle events are bridged onto the subscription topics.
    pub fn new(store: Arc<dyn JobStore>, config: &ServiceConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(registry.clone()));
        let bridge = NotificationBridge::new(
            broadcaster.clone(),
            config.realtime.subscription_topic_prefix.clone(),
        );

        let engine = ClaimEngine::new(
            store,
            EngineConfig {
                claim_wait: config.queue.claim_wait,
                single_in_flight: config.queue.single_in_flight,
            },
        )
        .with_notifier(Arc::new(bridge));

        Self {
            engine: Arc::new(engine),
            registry,
            broadcaster,
            realtime: Arc::new(config.realtime.clone()),
            admin: Arc::new(AdminToken::new(config.admin.token.as_deref())),
        }
    }
}
