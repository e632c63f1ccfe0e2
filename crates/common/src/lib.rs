//! Shared error type and small utilities used across the om-monitor workspace.

mod error;

pub use error::{OmError, OmResult};

use chrono::{DateTime, Utc};

/// Rank of a task within the parallelization engine. Rank 0 is always the
/// collector; ranks `1..n_workers` are worker tasks, mirroring the
/// MPI rank convention this engine's channel transport replaces.
pub type Rank = usize;

/// Wall-clock timestamp attached to processed records and log lines.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
