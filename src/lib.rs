//! Streaming FQL query engine.
//!
//! This library executes compiled FQL query plans over record streams:
//! ingress parsing, predicate filtering, grouped windowing (time, distance,
//! session), aggregation, projection with a post-aggregate filter, and
//! egress.

pub mod flowstream;

// Re-export main API
pub use flowstream::fql::{
    Catalog, Engine, EngineConfig, EngineError, EngineMetrics, EngineResult, Plan, Value,
};
