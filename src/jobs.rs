//! Job lifecycle
//!
//! Jobs are created queued, driven to a terminal state by exactly one run, and live
//! in memory until their TTL passes.

pub mod registry;
pub mod types;

pub use registry::{JobCounts, JobRegistry, RunStart};
pub use types::{Job, JobParams, JobState, JobsConfig};
