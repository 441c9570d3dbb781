//! Trade recording and log hygiene.
//!
//! `TradeRecorder` delivers closure records to pluggable backends
//! (`CsvRecorder`, `TracingRecorder`, fanned out via `MultiRecorder`);
//! `LogThrottle` keeps hot-path rejects from flooding the log.

pub mod csv_recorder;
pub mod recorder;
pub mod throttle;

pub use csv_recorder::CsvRecorder;
pub use recorder::{MultiRecorder, RecordError, TracingRecorder, TradeRecorder};
pub use throttle::LogThrottle;
