//! C8/C9/C10: the worker event loop, the collector's receive loop, and
//! the parallelization engine that wires them together over an in-process
//! channel transport.

pub mod collector;
pub mod engine;
pub mod message;
pub mod worker;

pub use collector::{CollectorContext, CollectorReport};
pub use engine::{run_engine, EngineReport, DEFAULT_CHANNEL_CAPACITY};
pub use message::WorkerMsg;
pub use worker::{ClassificationParams, WorkerContext};
