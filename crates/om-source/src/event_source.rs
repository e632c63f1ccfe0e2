//! C6: EventSource — a pluggable iterator over opaque facility events.

use std::any::Any;
use std::collections::HashMap;

use common::OmResult;

/// A single value an [`crate::extractor::Extractor`] callback can produce,
/// replacing the dynamic typing the original adapters rely on.
#[derive(Debug, Clone)]
pub enum ExtractedField {
    Float(f64),
    Int(i64),
    Text(String),
    Image(om_core::DetectorImage),
}

/// Free-form parameters threaded through to `initialize`/`iterate`, sourced
/// from the `[Onda]` configuration group.
#[derive(Debug, Clone, Default)]
pub struct SourceParams {
    pub values: HashMap<String, String>,
}

/// An opaque handle yielded by an `EventSource`. Lifecycle: yielded by the
/// iterator, opened exactly once, scanned for frames, closed exactly once
/// even on failure.
pub trait Event: Send {
    fn open(&mut self) -> OmResult<()>;
    fn close(&mut self) -> OmResult<()>;
    fn num_frames(&self) -> usize;

    /// Downcast support so named extractor callbacks can recover the
    /// concrete event type they were registered against.
    fn as_any(&self) -> &dyn Any;
}

/// Contract for a pluggable facility adapter. `initialize` runs once on
/// the collector before any worker calls `iterate`; `iterate` yields a
/// (possibly partitioned) sequence of events to one worker.
pub trait EventSource: Send {
    fn initialize(
        &mut self,
        source_string: &str,
        pool_size: usize,
        params: &SourceParams,
    ) -> OmResult<()>;

    fn iterate(
        &mut self,
        source_string: &str,
        node_rank: usize,
        pool_size: usize,
        params: &SourceParams,
    ) -> OmResult<Box<dyn Iterator<Item = Box<dyn Event>> + Send>>;
}

/// `(rank-1) * ceil(n / (pool_size-1))` slice bounds for a file-list-style
/// source, shared by `FileListSource` and `MockSource`.
pub fn partition_bounds(n: usize, node_rank: usize, pool_size: usize) -> (usize, usize) {
    let num_workers = pool_size.saturating_sub(1).max(1);
    let per_worker = n.div_ceil(num_workers);
    let start = node_rank.saturating_sub(1) * per_worker;
    let end = (start + per_worker).min(n);
    (start.min(n), end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_bounds_covers_all_events_exactly_once() {
        let pool_size = 4; // 1 master + 3 workers
        let n = 10;
        let mut covered = vec![false; n];
        for rank in 1..pool_size {
            let (start, end) = partition_bounds(n, rank, pool_size);
            for i in start..end {
                assert!(!covered[i], "index {i} covered twice");
                covered[i] = true;
            }
        }
        assert!(covered.iter().all(|&c| c));
    }
}
