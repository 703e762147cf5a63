//! Logstore Observability
//!
//! Prometheus collectors for ingestion, merges and queries.
//!
//! # Usage
//!
//! ```no_run
//! use logstore_observability::{exporter, metrics};
//!
//! metrics::init();
//! metrics::QUERIES_TOTAL.inc();
//! println!("{}", exporter::gather_text());
//! ```

pub mod exporter;
pub mod metrics;

pub use exporter::gather_text;
pub use metrics::{init as init_metrics, REGISTRY};

/// Initialize all observability components
pub fn init() {
    metrics::init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_does_not_panic() {
        init();
        init_metrics();
        let _registry = &*REGISTRY;
    }
}
