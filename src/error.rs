use crate::config::ConfigError;
use crate::core::library::LibraryError;
use crate::database::DatabaseError;
use serde::Serialize;
use thiserror::Error;

/// Failure while computing the fingerprint of a single photo.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Not enough metadata for a fallback fingerprint ({width}x{height})")]
    InsufficientMetadata { width: u32, height: u32 },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to fingerprint photo {photo_id}: {source}")]
    PhotoFingerprint {
        photo_id: String,
        #[source]
        source: FingerprintError,
    },

    #[error("Failed to persist group {group_key}: {source}")]
    GroupPersistence {
        group_key: String,
        #[source]
        source: DatabaseError,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] DatabaseError),

    #[error("Malformed fingerprint {value:?}: expected {expected} hex characters")]
    MalformedFingerprint { value: String, expected: usize },

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Photo {photo_id} is not a member of group {group_id}")]
    PhotoNotInGroup { group_id: String, photo_id: String },

    #[error("Photo library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    Fingerprint,
    GroupPersistence,
}

/// A recovered per-item failure, reported back to the caller as a summary line.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub kind: FailureKind,
    pub subject: String,
    pub message: String,
}

impl ItemFailure {
    /// Summarise a per-item error. Whole-run errors have no item form.
    pub fn from_error(error: &Error) -> Option<Self> {
        match error {
            Error::PhotoFingerprint { photo_id, source } => Some(Self {
                kind: FailureKind::Fingerprint,
                subject: photo_id.clone(),
                message: source.to_string(),
            }),
            Error::GroupPersistence { group_key, source } => Some(Self {
                kind: FailureKind::GroupPersistence,
                subject: group_key.clone(),
                message: source.to_string(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_failure_from_fingerprint_error() {
        let error = Error::PhotoFingerprint {
            photo_id: "pho_1".to_string(),
            source: FingerprintError::InsufficientMetadata {
                width: 0,
                height: 0,
            },
        };

        let failure = ItemFailure::from_error(&error).unwrap();
        assert_eq!(failure.kind, FailureKind::Fingerprint);
        assert_eq!(failure.subject, "pho_1");
        assert!(failure.message.contains("0x0"));
    }

    #[test]
    fn test_whole_run_errors_have_no_item_form() {
        let error = Error::GroupNotFound("grp_x".to_string());
        assert!(ItemFailure::from_error(&error).is_none());
    }
}
