//! # jobhub-entity
//!
//! Domain entity models for JobHub. Every struct in this crate is a plain
//! data value: job records, their lifecycle status, and the shapes they are
//! exposed and persisted in. All entities derive `Debug`, `Clone`,
//! `Serialize`, and `Deserialize`.

pub mod job;
