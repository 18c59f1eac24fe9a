//! Aggregation engine: turns a product family's reviews and tags into
//! derived analytics.

mod engine;
pub mod weights;

pub use engine::AggregationEngine;
pub use weights::{normalized_weights, weighted_score, StarCount};
