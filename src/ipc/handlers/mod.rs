pub mod core;
pub mod exchange;
pub mod files;
pub mod import_legacy;
pub mod questions;
pub mod setup;
