use super::{downcast, stats_columns, StatsProcessor};
use crate::block_result::BlockResult;
use bytes::BufMut;
use logstore_core::encoding::{marshal_var_u64, unmarshal_u64, unmarshal_var_u64};
use logstore_core::values::float64_string;
use rand::Rng;
use std::any::Any;

/// Maximum number of samples kept by `quantile` and `median` per group.
pub const MAX_HISTOGRAM_SAMPLES: usize = 10_000;

/// State of `quantile(phi, ...)` and `median(...)`.
///
/// Keeps a uniform random sample of the numeric values (reservoir sampling),
/// plus the exact minimum and maximum returned for `phi` 0 and 1.
pub(crate) struct StatsQuantile {
    fields: Vec<String>,
    phi: f64,
    samples: Vec<f64>,
    seen: u64,
    min: f64,
    max: f64,
}

impl StatsQuantile {
    pub(crate) fn new(fields: Vec<String>, phi: f64) -> Self {
        Self {
            fields,
            phi,
            samples: Vec::new(),
            seen: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn add(&mut self, f: f64) -> usize {
        if f.is_nan() {
            return 0;
        }
        self.min = self.min.min(f);
        self.max = self.max.max(f);
        self.seen += 1;
        if self.samples.len() < MAX_HISTOGRAM_SAMPLES {
            self.samples.push(f);
            return std::mem::size_of::<f64>();
        }
        let idx = rand::thread_rng().gen_range(0..self.seen);
        if let Ok(idx) = usize::try_from(idx) {
            if idx < self.samples.len() {
                self.samples[idx] = f;
            }
        }
        0
    }

    fn quantile(&self) -> f64 {
        if self.samples.is_empty() {
            return f64::NAN;
        }
        if self.phi <= 0.0 {
            return self.min;
        }
        if self.phi >= 1.0 {
            return self.max;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable_by(f64::total_cmp);
        let idx = ((self.phi * sorted.len() as f64) as usize).min(sorted.len() - 1);
        sorted[idx]
    }
}

impl StatsProcessor for StatsQuantile {
    fn update_all_rows(&mut self, br: &BlockResult) -> usize {
        let mut bytes = 0;
        for c in stats_columns(br, &self.fields) {
            for row in 0..br.rows_len() {
                if let Some(f) = c.numeric_value(row) {
                    bytes += self.add(f);
                }
            }
        }
        bytes
    }

    fn update_row(&mut self, br: &BlockResult, row: usize) -> usize {
        let mut bytes = 0;
        for c in stats_columns(br, &self.fields) {
            if let Some(f) = c.numeric_value(row) {
                bytes += self.add(f);
            }
        }
        bytes
    }

    fn merge_state(&mut self, other: &dyn StatsProcessor) -> usize {
        let other = downcast::<Self>(other);
        let before = self.samples.len();
        let (min, max) = (self.min.min(other.min), self.max.max(other.max));
        for &f in &other.samples {
            self.add(f);
        }
        // Values dropped from the other reservoir still count towards the sampling odds.
        self.seen += other.seen - other.samples.len() as u64;
        self.min = min;
        self.max = max;
        (self.samples.len() - before) * std::mem::size_of::<f64>()
    }

    fn export_state(&self, dst: &mut Vec<u8>) {
        marshal_var_u64(dst, self.seen);
        marshal_var_u64(dst, self.samples.len() as u64);
        for f in &self.samples {
            dst.put_u64(f.to_bits());
        }
        dst.put_u64(self.min.to_bits());
        dst.put_u64(self.max.to_bits());
    }

    fn import_state(&mut self, src: &mut &[u8]) -> logstore_core::Result<usize> {
        let seen = unmarshal_var_u64(src)?;
        let n = unmarshal_var_u64(src)?;
        if n > MAX_HISTOGRAM_SAMPLES as u64 || n > seen {
            return Err(logstore_core::Error::decode(format!(
                "invalid quantile state with {n} samples out of {seen} values"
            )));
        }
        let mut samples = Vec::with_capacity(n as usize);
        for _ in 0..n {
            samples.push(f64::from_bits(unmarshal_u64(src)?));
        }
        self.min = f64::from_bits(unmarshal_u64(src)?);
        self.max = f64::from_bits(unmarshal_u64(src)?);
        self.seen = seen;
        self.samples = samples;
        Ok(self.samples.len() * std::mem::size_of::<f64>())
    }

    fn finalize(&self) -> String {
        float64_string(self.quantile())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_is_bounded() {
        let mut sq = StatsQuantile::new(Vec::new(), 0.5);
        for i in 0..(3 * MAX_HISTOGRAM_SAMPLES) {
            sq.add(i as f64);
        }
        assert_eq!(sq.samples.len(), MAX_HISTOGRAM_SAMPLES);
        assert_eq!(sq.seen, 3 * MAX_HISTOGRAM_SAMPLES as u64);
        assert_eq!(sq.min, 0.0);
        assert_eq!(sq.max, (3 * MAX_HISTOGRAM_SAMPLES - 1) as f64);

        let median = sq.quantile();
        let want = 1.5 * MAX_HISTOGRAM_SAMPLES as f64;
        assert!((median - want).abs() < 0.1 * want, "median {median} is too far from {want}");
    }

    #[test]
    fn test_empty_quantile() {
        let sq = StatsQuantile::new(Vec::new(), 0.9);
        assert_eq!(sq.finalize(), "NaN");
    }
}
