//! SLA daemon: hosts the workflow engine over a JSON record file.
//!
//! - [`file_store`]: the `RecordStore` implementation
//! - [`lock`]: advisory lock serializing writers of the record file
//! - [`cli`]: clap command definitions
//! - [`app`]: config loading and command execution

pub mod app;
pub mod cli;
pub mod file_store;
pub mod lock;

pub use file_store::JsonFileStore;
