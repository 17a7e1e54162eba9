// Streaming FQL module for flowstream
// Provides plan loading, per-query code generation, and pipeline execution

pub mod catalog;
pub mod codegen;
pub mod error;
pub mod execution;
pub mod plan;

// Re-export main API
pub use catalog::Catalog;
pub use error::{EngineError, EngineResult};
pub use execution::engine::{Engine, EngineConfig, EngineMetrics};
pub use execution::types::Value;
pub use plan::Plan;

// Version and feature info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const FEATURES: &[&str] = &[
    "binary_plan",        // tagged binary plan wire format with stable ordinals
    "tumbling_windows",   // time- and distance-driven tumbling windows
    "session_windows",    // predicate-bounded sessions with closing-row routing
    "grouped_aggregation", // per-group functor banks, isolated window state
    "approx_unique",      // HyperLogLog cardinality sketch (2^17 registers)
    "generated_filters",  // per-query predicate programs for all five gates
];
