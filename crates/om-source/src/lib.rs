//! C6/C7: pluggable event sources and the extractor callback table.
//!
//! Two concrete `EventSource` implementations are provided: [`FileListSource`]
//! (newline-delimited file list, the original's default facility-agnostic
//! adapter) and [`MockSource`] (an in-process synthetic generator used by
//! tests and development). Real facility adapters (psana, HiDRA, Karabo)
//! are external collaborators per spec.md §1 and are not implemented here.

pub mod event_source;
pub mod extractor;
pub mod file_list;
pub mod mock;

pub use event_source::{partition_bounds, Event, EventSource, ExtractedField, SourceParams};
pub use extractor::{ExtractFn, Extractor};
pub use file_list::{FileEvent, FileListSource};
pub use mock::{MockEvent, MockSource, MockSourceConfig};
