//! A terminal client for a shared chat room, built on `parrot`.

pub mod app;
pub mod config;
pub mod terminal;

pub use app::run;
pub use config::{BackendKind, Config, ConfigError};
