//! HTTP surface: routing, middleware, publish and subscribe pipelines

pub mod auth;
pub mod file;
pub mod middleware;
pub mod params;
pub mod publish;
pub mod server;
pub mod site;
pub mod subscribe;
pub mod types;
pub mod ws;

pub use auth::{AllowAll, AuthError, Auther, MemoryAuther, Permission, User};
pub use server::{ApiServer, ServerState, router};
pub use types::ApiError;
