//! personctl core library.
//!
//! This crate provides the components for validating and applying person
//! mutations: configuration, the attribute catalog, record validation,
//! custom-attribute merging, extension hooks, device bindings, SQLite
//! persistence, and the mutation pipeline that ties them together.

pub mod catalog;
pub mod config;
pub mod db;
pub mod devices;
pub mod errors;
pub mod hooks;
pub mod merger;
pub mod models;
pub mod pipeline;
pub mod store;
pub mod validator;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::Database;
pub use devices::DeviceBindingStore;
pub use hooks::{ExternalHookRunner, HookModule, HookPoint};
pub use pipeline::{EditSession, IdentityMutationPipeline, PersonEdits};
