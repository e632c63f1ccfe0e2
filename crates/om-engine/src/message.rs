//! Wire messages exchanged between workers and the collector over the
//! engine's channel transport, replacing the MPI `DataMsg`/`EndMsg`/
//! `DieMsg`/`DeadMsg` tags spec.md §9 describes.

use om_core::ProcessedRecord;

/// Sent by a worker to the collector.
#[derive(Debug)]
pub enum WorkerMsg {
    /// One reduced frame.
    Data(ProcessedRecord),
    /// The worker's event source is exhausted; it is finalizing normally.
    /// Carries the worker's rank — the `TerminationToken` of spec.md §3.
    End { worker_rank: usize },
    /// The worker observed the shutdown flag and is finalizing early, in
    /// response to a master-initiated shutdown (the `DeadMsg` ack of
    /// spec.md §9).
    Dead { worker_rank: usize },
}
