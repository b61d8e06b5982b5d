// Error types
pub mod error;

// Phase catalog and enablement
pub mod catalog;
pub mod enablement;

// Progress reducer
pub mod mapper;

// Backend transports
pub mod backend;
pub mod channel;

// Readiness gate and retry queue
pub mod gate;

// Snapshot publication and session lifecycle
pub mod engine;
pub mod session;
pub mod task_registry;

// Configuration and CLI
pub mod cli;
pub mod config;

pub use catalog::PhaseCatalog;
pub use engine::{EngineCommand, StatusEngine};
pub use error::{BackendError, CatalogError, ChannelError, GateError, NormalizeError};
pub use gate::{GateConfig, GateOutcome, ReadinessGate};
pub use session::{GenerationSession, SessionOptions, StreamSpec, Transports};
