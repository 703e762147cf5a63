use prometheus::{Encoder, TextEncoder};

use crate::metrics::REGISTRY;

/// Renders all registered metrics in the Prometheus text exposition format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => String::from_utf8_lossy(&buffer).into_owned(),
        Err(e) => {
            tracing::warn!(error = %e, "cannot encode metrics");
            String::new()
        }
    }
}
