//! HTTP API: platform webhook, ruleset upload and liveness

mod handlers;
mod types;

pub use handlers::create_router;

use crate::dispatcher::EventSink;
use crate::services::ConversationStore;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub events: Arc<dyn EventSink>,
    pub store: Arc<dyn ConversationStore>,
}

impl AppState {
    pub fn new(events: Arc<dyn EventSink>, store: Arc<dyn ConversationStore>) -> Self {
        Self { events, store }
    }
}
