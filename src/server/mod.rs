//! HTTP API server
//!
//! - [`api`] holds the routes and handlers
//! - [`server`] wires the components into [`AppState`] and runs axum

pub mod api;
pub mod server;

pub use api::create_router;
pub use server::{AppState, Server, ServerError, ServerInfo};
