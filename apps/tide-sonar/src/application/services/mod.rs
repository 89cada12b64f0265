//! Application Services
//!
//! - `AnomalyMonitor`: screens a snapshot and scores alerts
//! - `ProducerLoop`: drives polling cadence and publishes ranked batches

mod monitor;
mod producer;

pub use monitor::AnomalyMonitor;
pub use producer::{
    CycleReport, ProducerConfig, ProducerLoop, ProducerState, ProducerStatus, next_state,
};
