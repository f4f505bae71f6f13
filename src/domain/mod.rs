//! Domain types for the sluice engine.
//!
//! - Payload: the envelope passed between every pipeline stage

pub mod payload;

// Re-export commonly used types
pub use payload::Payload;
