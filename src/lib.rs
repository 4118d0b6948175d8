//! Core library surface for Tabby, a terminal catalogue for a personal book
//! collection organized into categories.
//!
//! The binary wires these together; tests and tooling can drive the
//! [`Library`] service directly without a terminal.
pub mod config;
pub mod db;
pub mod error;
pub mod library;
pub mod logging;
pub mod models;
pub mod scan;
pub mod ui;

pub use config::Config;
pub use db::Store;
pub use error::{LibraryError, LibraryResult};
pub use library::Library;
pub use models::{Book, BookKey, Category, NewBook, RecommendedBook};
pub use scan::CoverScanner;
pub use ui::{run_app, App};
