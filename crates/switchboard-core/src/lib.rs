//! Shared configuration and error types for the Switchboard gateway.

pub mod config;
pub mod error;

pub use config::SwitchboardConfig;
pub use error::{Result, SwitchboardError};
