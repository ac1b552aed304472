// src/logger/mod.rs

mod attribution_log;
mod metrics;

pub use attribution_log::{
    read_attribution_log, record_for_sample, token_label, write_attribution_log, AttributionLogWriter,
    AttributionRecord, TokenAttribution,
};
pub use metrics::{MemorySink, MetricsCsv, MetricsSink, TrainLogger};
