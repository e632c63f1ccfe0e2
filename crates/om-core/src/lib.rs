//! Per-frame numeric core: calibration, Bragg peak search, and the
//! bounded-memory aggregation primitives used by the collector.

pub mod accumulator;
pub mod correction;
pub mod data;
pub mod peakfinder8;
#[cfg(feature = "hdf5-io")]
pub mod reference_arrays;
pub mod rolling;

pub use accumulator::DataAccumulator;
pub use correction::Correction;
pub use data::{BadPixelMap, DetectorImage, PeakList, ProcessedRecord, RadiusMap, TerminationToken};
pub use peakfinder8::{Peakfinder8, Peakfinder8Params};
#[cfg(feature = "hdf5-io")]
pub use reference_arrays::{load_f32_dataset, load_u8_dataset};
pub use rolling::RollingWindow;
