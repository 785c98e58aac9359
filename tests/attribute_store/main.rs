//! Attribute store integration suite
//!
//! Drives the re-exported public API end to end over SQLite files.

#[path = "../common/mod.rs"]
mod common;

mod config;
mod identity;
mod lifecycle;
mod typed_access;
