//! # jobhub-core
//!
//! Core crate for JobHub. Contains the configuration schemas and the
//! unified error system shared by the scheduler, the server binary and the
//! inspection CLI.
//!
//! This crate has **no** internal dependencies on other JobHub crates.

pub mod config;
pub mod error;
pub mod result;

pub use error::AppError;
pub use result::AppResult;
