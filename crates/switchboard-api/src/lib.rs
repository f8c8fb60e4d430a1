//! Switchboard API crate - axum HTTP surface for the action dispatcher.
//!
//! Exposes action submission, job lookup, the action registry and a health
//! probe over JSON.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
