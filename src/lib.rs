pub mod config;
pub mod core;
pub mod database;
pub mod error;
pub mod progress;
pub mod service;

pub use config::AnalysisConfig;
pub use crate::core::fingerprint::{Fingerprint, FingerprintKind, Fingerprinter, ImageFingerprinter};
pub use crate::core::library::{FsLibrary, PhotoLibrary};
pub use database::models::{AnalysisSession, Group, GroupMember, Photo, SessionStatus};
pub use database::Database;
pub use error::{Error, ItemFailure};
pub use progress::{AnalysisProgress, CancellationToken, ProgressReporter, SilentReporter};
pub use service::{AnalysisResult, Deduplicator, DeleteResult};
