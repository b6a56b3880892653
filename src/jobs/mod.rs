//! Job records, the in-memory job table and the status tracker.
pub mod job;
pub mod store;
pub mod tracker;

pub use job::{Job, JobOptions, JobStatus, Observation};
pub use store::JobStore;
pub use tracker::{JobTracker, PollSchedule};
