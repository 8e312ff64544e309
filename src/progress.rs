use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisStage {
    Fingerprinting,
    Grouping,
    Persisting,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisProgress {
    pub stage: AnalysisStage,
    pub processed: usize,
    pub total: usize,
    pub percentage: f64,
    pub message: String,
}

impl AnalysisProgress {
    /// Fingerprinting spans 0-80%, clustering sits at 90%, persisting
    /// groups fills the rest.
    pub fn new(stage: AnalysisStage, processed: usize, total: usize) -> Self {
        let fraction = if total == 0 {
            1.0
        } else {
            processed as f64 / total as f64
        };
        let (percentage, message) = match stage {
            AnalysisStage::Fingerprinting => (
                fraction * 80.0,
                format!("Fingerprinting {}/{}", processed, total),
            ),
            AnalysisStage::Grouping => (90.0, "Grouping".to_string()),
            AnalysisStage::Persisting => (
                90.0 + fraction * 10.0,
                format!("Saving group {}/{}", processed, total),
            ),
            AnalysisStage::Complete => (100.0, "Complete".to_string()),
        };

        Self {
            stage,
            processed,
            total,
            percentage,
            message,
        }
    }
}

/// Receives progress during an analysis run. Called from worker threads
/// while fingerprinting.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, _progress: &AnalysisProgress) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Shared cancellation flag, checked between photos and between groups.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percentages() {
        let half = AnalysisProgress::new(AnalysisStage::Fingerprinting, 5, 10);
        assert_eq!(half.percentage, 40.0);
        assert_eq!(half.message, "Fingerprinting 5/10");

        assert_eq!(
            AnalysisProgress::new(AnalysisStage::Grouping, 0, 0).percentage,
            90.0
        );
        assert_eq!(
            AnalysisProgress::new(AnalysisStage::Persisting, 2, 2).percentage,
            100.0
        );
        assert_eq!(
            AnalysisProgress::new(AnalysisStage::Fingerprinting, 0, 0).percentage,
            80.0
        );
    }

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
