//! facesift-engine — runs face searches over photo batches and shares the results.
//!
//! The ONNX models live on a dedicated thread behind [`EngineHandle`]; a
//! [`BatchOrchestrator`] walks the candidates one at a time and reports through
//! an [`EventSink`]; matches can be zipped and published through an ordered
//! chain of hosting services.

pub mod batch;
pub mod config;
pub mod engine;
pub mod events;
pub mod provider;
pub mod publish;
pub mod session;

pub use batch::{BatchError, BatchOptions, BatchOrchestrator, BatchRun, MatchRecord, RunStatus};
pub use config::Config;
pub use engine::{spawn_engine, spawn_with, EngineError, EngineHandle};
pub use events::{EventSink, LogEvent, LogLevel, RunEvent, RunSummary, TracingSink};
pub use provider::{DescriptorProvider, DetectionError};
pub use session::{Archive, Session};
