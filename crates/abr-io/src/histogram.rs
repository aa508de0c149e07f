//! Scalar histograms for key data
//!
//! Bins one scalar array of a key data object into equal-width bins. The
//! result is padded with empty bins at the key data's own range and at the
//! requested (variable-wide) range, so a chart of it reaches the variable's
//! true bounds with zero counts outside the key data.

use serde::{Deserialize, Serialize};

use crate::loader::{IoError, IoResult};
use crate::raw_dataset::RawDataset;

/// One histogram bin: the count of values up to `bin_max`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBin {
    pub bin_max: f32,
    pub items: usize,
}

/// Histogram of a scalar variable over one key data object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Histogram {
    pub histogram: Vec<HistogramBin>,
    pub key_data_min: f32,
    pub key_data_max: f32,
}

/// Default number of bins
pub const DEFAULT_BINS: usize = 540;

impl RawDataset {
    /// Histogram of a scalar array, padded out to `range` when given
    pub fn histogram(
        &self,
        variable: &str,
        bins: usize,
        range: Option<(f32, f32)>,
    ) -> IoResult<Histogram> {
        let scalar = self
            .scalar(variable)
            .ok_or_else(|| IoError::ArrayNotFound(variable.to_string()))?;
        let bins = bins.max(1);
        let (lo, hi) = (scalar.min, scalar.max);
        let width = (hi - lo) / bins as f32;

        let mut counts = vec![0usize; bins];
        for &v in scalar.values.iter().filter(|v| v.is_finite()) {
            let bin = if width > 0.0 {
                (((v - lo) / width) as usize).min(bins - 1)
            } else {
                0
            };
            counts[bin] += 1;
        }

        let (var_min, var_max) = range.unwrap_or((lo, hi));
        let mut histogram = Vec::with_capacity(bins + 4);
        histogram.push(HistogramBin {
            bin_max: var_min,
            items: 0,
        });
        histogram.push(HistogramBin {
            bin_max: lo,
            items: 0,
        });
        histogram.extend(counts.iter().enumerate().map(|(i, &items)| HistogramBin {
            bin_max: lo + width * (i + 1) as f32,
            items,
        }));
        histogram.push(HistogramBin {
            bin_max: hi,
            items: 0,
        });
        histogram.push(HistogramBin {
            bin_max: var_max,
            items: 0,
        });

        Ok(Histogram {
            histogram,
            key_data_min: lo,
            key_data_max: hi,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::MeshTopology;

    fn points(values: Vec<f32>) -> RawDataset {
        RawDataset::builder(MeshTopology::Points)
            .vertices(vec![[0.0; 3]; values.len()])
            .scalar("s", values)
            .build()
            .unwrap()
    }

    #[test]
    fn test_histogram_counts() {
        let data = points(vec![0.0, 0.1, 0.5, 0.9, 1.0]);
        let h = data.histogram("s", 2, None).unwrap();
        // two padding bins, two real bins, two padding bins
        assert_eq!(h.histogram.len(), 6);
        let counts: Vec<usize> = h.histogram.iter().map(|b| b.items).collect();
        assert_eq!(counts, vec![0, 0, 2, 3, 0, 0]);
        assert_eq!(h.key_data_min, 0.0);
        assert_eq!(h.key_data_max, 1.0);
    }

    #[test]
    fn test_histogram_padded_to_variable_range() {
        let data = points(vec![2.0, 3.0]);
        let h = data.histogram("s", 4, Some((0.0, 10.0))).unwrap();
        assert_eq!(h.histogram.first().unwrap().bin_max, 0.0);
        assert_eq!(h.histogram.last().unwrap().bin_max, 10.0);
        let total: usize = h.histogram.iter().map(|b| b.items).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_histogram_constant_values() {
        let data = points(vec![5.0, 5.0, 5.0]);
        let h = data.histogram("s", 3, None).unwrap();
        let total: usize = h.histogram.iter().map(|b| b.items).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_histogram_missing_variable() {
        let data = points(vec![1.0]);
        assert!(matches!(
            data.histogram("nope", 4, None),
            Err(IoError::ArrayNotFound(_))
        ));
    }
}
