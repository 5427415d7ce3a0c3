//! # djorm-core
//!
//! Foundation types for djorm: the error taxonomy, settings and their loader,
//! and tracing setup. This crate has no database dependencies.
//!
//! ## Modules
//!
//! - [`error`] - [`OrmError`] and [`OrmResult`]
//! - [`settings`] - [`Settings`] and [`DatabaseSettings`]
//! - [`settings_loader`] - TOML / JSON / environment loading
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

pub use error::{DriverError, OrmError, OrmResult};
pub use settings::{DatabaseSettings, Settings, SETTINGS};
