//! Core application infrastructure

pub mod cli;
pub mod config;
pub mod constants;
pub mod shutdown;

pub use crate::app::{Collaborators, CoreApp};
pub use cli::Cli;
pub use config::{Config, WebRoot};
pub use shutdown::ShutdownService;
