//! Ares Backend Library
//!
//! Authentication, sessions and role-based access control for the social
//! fitness API. The `ares` binary wires these modules into an axum server.

pub mod api;
pub mod audit;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod middleware;
pub mod rbac;
pub mod store;

pub use api::AppState;
pub use config::Config;
pub use error::{ApiError, ApiResult};
