//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use switchboard_action::Dispatcher;

/// Shared application state.
///
/// Cheap to clone; the dispatcher owns every mutable container.
#[derive(Clone)]
pub struct AppState {
    /// Action engine.
    pub dispatcher: Arc<Dispatcher>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            start_time: Instant::now(),
        }
    }
}
