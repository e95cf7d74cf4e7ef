//! binflow - edge processing node for container fill-level sensors
//!
//! Accepts measurement batches from field sensors, compresses a rolling window
//! per container into one aggregate every tick, and forwards aggregates to a
//! central collector until acknowledged.

pub mod pipeline;
pub mod sqlite_pragma;
