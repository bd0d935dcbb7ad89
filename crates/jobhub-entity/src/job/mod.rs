//! Background job domain entities.

pub mod model;
pub mod persisted;
pub mod status;

pub use model::{InvalidTransition, JobArgs, JobRecord, JobView};
pub use persisted::PersistedJob;
pub use status::JobStatus;
