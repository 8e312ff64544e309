use crate::config::AnalysisConfig;
use crate::core::fingerprint::{Fingerprint, FINGERPRINT_BITS};
use crate::error::Error;

impl Fingerprint {
    /// Hamming distance over the 256-bit expansion.
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        self.as_bytes()
            .iter()
            .zip(other.as_bytes().iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// `1 - distance / 256`, in `[0, 1]`.
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        1.0 - f64::from(self.distance(other)) / FINGERPRINT_BITS as f64
    }
}

/// Distance between two stored fingerprint strings. Both must already be
/// normalized; anything else is a pipeline defect and is reported, not
/// coerced.
pub fn distance(a: &str, b: &str) -> Result<u32, Error> {
    let a: Fingerprint = a.parse()?;
    let b: Fingerprint = b.parse()?;
    Ok(a.distance(&b))
}

pub fn similarity(a: &str, b: &str) -> Result<f64, Error> {
    let a: Fingerprint = a.parse()?;
    let b: Fingerprint = b.parse()?;
    Ok(a.similarity(&b))
}

/// Threshold policy for the two duplicate predicates, in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistancePolicy {
    pub near_duplicate: u32,
    pub identical: u32,
}

impl Default for DistancePolicy {
    fn default() -> Self {
        Self {
            near_duplicate: 12,
            identical: 5,
        }
    }
}

impl From<&AnalysisConfig> for DistancePolicy {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            near_duplicate: config.near_duplicate_threshold,
            identical: config.identical_threshold,
        }
    }
}

impl DistancePolicy {
    pub fn is_near_duplicate(&self, a: &Fingerprint, b: &Fingerprint) -> bool {
        a.distance(b) <= self.near_duplicate
    }

    pub fn is_identical(&self, a: &Fingerprint, b: &Fingerprint) -> bool {
        a.distance(b) <= self.identical
    }
}
