//! Core functionality shared across the application:
//! - Configuration (layered defaults / file / environment)
//! - Error handling
//! - The model catalog and provider table
//! - The routing-decision sink

pub mod catalog;
pub mod config;
pub mod error;
pub mod route_log;

pub use catalog::{ModelEntry, Provider, Tier};
pub use config::{AppConfig, TierModelConfig, TierModels};
pub use error::{AppError, Result};
pub use route_log::{RouteLog, RouteRecord};
