use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Registry holding every logstore collector
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Ingestion Metrics
    // ============================================================================

    /// Rows accepted into ingestion batches
    pub static ref ROWS_INGESTED_TOTAL: IntCounter = IntCounter::new(
        "logstore_rows_ingested_total",
        "Total rows accepted for ingestion"
    ).expect("metric can be created");

    /// Rows rejected during ingestion, by reason
    pub static ref ROWS_DROPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("logstore_rows_dropped_total", "Total rows dropped during ingestion"),
        &["reason"] // too_small_timestamp, too_big_timestamp
    ).expect("metric can be created");

    // ============================================================================
    // Merge Metrics
    // ============================================================================

    /// Completed part merges
    pub static ref MERGES_TOTAL: IntCounter = IntCounter::new(
        "logstore_merges_total",
        "Total part merges"
    ).expect("metric can be created");

    /// Blocks written by merges
    pub static ref MERGED_BLOCKS_TOTAL: IntCounter = IntCounter::new(
        "logstore_merged_blocks_total",
        "Total blocks written by merges"
    ).expect("metric can be created");

    /// Rows written by merges
    pub static ref MERGED_ROWS_TOTAL: IntCounter = IntCounter::new(
        "logstore_merged_rows_total",
        "Total rows written by merges"
    ).expect("metric can be created");

    /// Rows removed by delete tasks
    pub static ref ROWS_DELETED_TOTAL: IntCounter = IntCounter::new(
        "logstore_rows_deleted_total",
        "Total rows removed by delete tasks"
    ).expect("metric can be created");

    // ============================================================================
    // Query Metrics
    // ============================================================================

    /// Executed queries
    pub static ref QUERIES_TOTAL: IntCounter = IntCounter::new(
        "logstore_queries_total",
        "Total executed queries"
    ).expect("metric can be created");

    /// Queries rejected by the parser
    pub static ref QUERY_PARSE_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "logstore_query_parse_errors_total",
        "Total queries rejected by the parser"
    ).expect("metric can be created");

    /// Blocks read by query workers
    pub static ref BLOCKS_SCANNED_TOTAL: IntCounter = IntCounter::new(
        "logstore_blocks_scanned_total",
        "Total blocks scanned by queries"
    ).expect("metric can be created");

    /// Query latency
    pub static ref QUERY_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("logstore_query_duration_seconds", "Query duration in seconds")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0])
    ).expect("metric can be created");
}

/// Registers all collectors in [`REGISTRY`]. Safe to call more than once.
pub fn init() {
    INIT.call_once(|| {
        // Ingestion metrics
        REGISTRY
            .register(Box::new(ROWS_INGESTED_TOTAL.clone()))
            .expect("rows_ingested_total can be registered");
        REGISTRY
            .register(Box::new(ROWS_DROPPED_TOTAL.clone()))
            .expect("rows_dropped_total can be registered");

        // Merge metrics
        REGISTRY
            .register(Box::new(MERGES_TOTAL.clone()))
            .expect("merges_total can be registered");
        REGISTRY
            .register(Box::new(MERGED_BLOCKS_TOTAL.clone()))
            .expect("merged_blocks_total can be registered");
        REGISTRY
            .register(Box::new(MERGED_ROWS_TOTAL.clone()))
            .expect("merged_rows_total can be registered");
        REGISTRY
            .register(Box::new(ROWS_DELETED_TOTAL.clone()))
            .expect("rows_deleted_total can be registered");

        // Query metrics
        REGISTRY
            .register(Box::new(QUERIES_TOTAL.clone()))
            .expect("queries_total can be registered");
        REGISTRY
            .register(Box::new(QUERY_PARSE_ERRORS_TOTAL.clone()))
            .expect("query_parse_errors_total can be registered");
        REGISTRY
            .register(Box::new(BLOCKS_SCANNED_TOTAL.clone()))
            .expect("blocks_scanned_total can be registered");
        REGISTRY
            .register(Box::new(QUERY_DURATION.clone()))
            .expect("query_duration can be registered");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        assert!(!REGISTRY.gather().is_empty());
    }

    #[test]
    fn test_dropped_rows_by_reason() {
        init();
        let before = ROWS_DROPPED_TOTAL.with_label_values(&["too_big_timestamp"]).get();
        ROWS_DROPPED_TOTAL.with_label_values(&["too_big_timestamp"]).inc();
        assert_eq!(
            ROWS_DROPPED_TOTAL.with_label_values(&["too_big_timestamp"]).get(),
            before + 1
        );
    }
}
