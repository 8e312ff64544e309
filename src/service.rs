use crate::config::AnalysisConfig;
use crate::core::fingerprint::{Fingerprinter, ImageFingerprinter};
use crate::core::grouping::GroupingEngine;
use crate::core::library::PhotoLibrary;
use crate::database::models::{AnalysisSession, Group, Photo, SessionStatus, SessionUpdate};
use crate::database::repositories::group::GroupRefresh;
use crate::database::Database;
use crate::error::{Error, ItemFailure};
use crate::progress::{AnalysisProgress, AnalysisStage, CancellationToken, ProgressReporter};
use log::{error, info};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub session_id: String,
    pub total_photos: usize,
    pub analyzed_photos: usize,
    pub duplicates_found: u64,
    pub groups: Vec<Group>,
    pub potential_space_saved: u64,
    pub processing_time_ms: u64,
    pub failures: Vec<ItemFailure>,
    pub degraded_fingerprints: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteError {
    pub photo_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteResult {
    pub deleted_count: usize,
    pub errors: Vec<DeleteError>,
}

/// Caller-facing entry point: analysis runs, group review and deletion.
/// At most one analysis runs at a time per store.
pub struct Deduplicator {
    db: Database,
    library: Box<dyn PhotoLibrary>,
    fingerprinter: Box<dyn Fingerprinter>,
    config: AnalysisConfig,
}

impl Deduplicator {
    pub fn new(
        db: Database,
        library: Box<dyn PhotoLibrary>,
        fingerprinter: Box<dyn Fingerprinter>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            db,
            library,
            fingerprinter,
            config,
        }
    }

    /// Use the persisted configuration and the image fingerprinter.
    pub fn with_stored_config(db: Database, library: Box<dyn PhotoLibrary>) -> Result<Self, Error> {
        let config = db.config().get_config()?;
        let fingerprinter = Box::new(ImageFingerprinter::new(config.allow_metadata_fallback));
        Ok(Self::new(db, library, fingerprinter, config))
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AnalysisConfig {
        &mut self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Analyze a photo batch and record the run as a session. Per-item
    /// failures come back in the result; a whole-run failure marks the
    /// session `error` and is returned.
    pub fn analyze(
        &self,
        photos: &[Photo],
        reporter: &dyn ProgressReporter,
        clear_existing: bool,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, Error> {
        let start = Instant::now();
        let session_id = self.db.sessions().start_session(photos.len() as u64)?;
        info!(
            "Started analysis {} over {} photos (clear existing: {})",
            session_id,
            photos.len(),
            clear_existing
        );

        let engine = GroupingEngine::new(&self.db, self.fingerprinter.as_ref(), &self.config);
        let report = match engine.analyze(photos, clear_existing, reporter, cancel) {
            Ok(report) => report,
            Err(err) => {
                error!("Analysis {} failed: {}", session_id, err);
                let update = SessionUpdate {
                    status: Some(SessionStatus::Error),
                    error_message: Some(err.to_string()),
                    ..SessionUpdate::default()
                };
                if let Err(e) = self.db.sessions().update_session(&session_id, &update) {
                    error!("Could not record failure of {}: {}", session_id, e);
                }
                return Err(err);
            }
        };

        let duplicates_found = report.duplicates_found();
        let potential_space_saved = report.potential_space_saved();
        let status = if report.cancelled {
            SessionStatus::Cancelled
        } else {
            SessionStatus::Completed
        };

        self.db.sessions().update_session(
            &session_id,
            &SessionUpdate {
                analyzed_photos: Some(report.analyzed as u64),
                duplicates_found: Some(duplicates_found),
                bytes_analyzed: Some(report.bytes_analyzed),
                bytes_potentially_saved: Some(potential_space_saved),
                status: Some(status),
                error_message: None,
            },
        )?;

        if !report.cancelled {
            reporter.on_progress(&AnalysisProgress::new(
                AnalysisStage::Complete,
                photos.len(),
                photos.len(),
            ));
        }

        let result = AnalysisResult {
            session_id,
            total_photos: photos.len(),
            analyzed_photos: report.analyzed,
            duplicates_found,
            groups: report.groups,
            potential_space_saved,
            processing_time_ms: start.elapsed().as_millis() as u64,
            failures: report.failures,
            degraded_fingerprints: report.degraded,
            cancelled: report.cancelled,
        };

        info!(
            "Analysis {} {}: {} groups, {} duplicates, {} bytes reclaimable, {} failures in {} ms",
            result.session_id,
            status.as_str(),
            result.groups.len(),
            result.duplicates_found,
            result.potential_space_saved,
            result.failures.len(),
            result.processing_time_ms
        );
        Ok(result)
    }

    /// List the library and analyze everything in it.
    pub fn analyze_library(
        &self,
        reporter: &dyn ProgressReporter,
        clear_existing: bool,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult, Error> {
        let photos = self.library.list_photos()?;
        self.analyze(&photos, reporter, clear_existing, cancel)
    }

    /// Delete members of a group through the library. Ids outside the group
    /// are reported, not deleted. Every group holding a deleted photo is
    /// repaired afterwards and removed once one live member is left.
    pub fn delete_group_members(
        &self,
        group_id: &str,
        photo_ids: &[String],
    ) -> Result<DeleteResult, Error> {
        let group = self
            .db
            .groups()
            .find_by_id(group_id)?
            .ok_or_else(|| Error::GroupNotFound(group_id.to_string()))?;

        let mut result = DeleteResult::default();
        let mut targets = Vec::new();
        for photo_id in photo_ids {
            if group.contains(photo_id) {
                targets.push(photo_id.clone());
            } else {
                let err = Error::PhotoNotInGroup {
                    group_id: group_id.to_string(),
                    photo_id: photo_id.clone(),
                };
                result.errors.push(DeleteError {
                    photo_id: photo_id.clone(),
                    message: err.to_string(),
                });
            }
        }
        if targets.is_empty() {
            return Ok(result);
        }

        let report = self.library.delete_photos(&targets);
        result
            .errors
            .extend(report.errors.into_iter().map(|(photo_id, message)| DeleteError {
                photo_id,
                message,
            }));
        result.deleted_count = report.deleted.len();

        if report.deleted.is_empty() {
            return Ok(result);
        }

        // The files are gone; store failures become per-photo errors
        match self.db.groups().remove_deleted_members(&report.deleted) {
            Ok(refreshed) => {
                for (id, refresh) in refreshed {
                    match refresh {
                        GroupRefresh::Updated { member_count } => {
                            info!("Group {} updated, {} members remain", id, member_count)
                        }
                        GroupRefresh::Removed => info!("Group {} resolved", id),
                    }
                }
            }
            Err(e) => {
                error!(
                    "Deleted {} photos from the library but could not update the store: {}",
                    report.deleted.len(),
                    e
                );
                let message = format!("deleted from library, store not updated: {}", e);
                result
                    .errors
                    .extend(report.deleted.iter().map(|photo_id| DeleteError {
                        photo_id: photo_id.clone(),
                        message: message.clone(),
                    }));
            }
        }

        Ok(result)
    }

    /// Mark a group as not duplicates. Its members lose their duplicate flag.
    pub fn reject_group(&self, group_id: &str) -> Result<(), Error> {
        if !self.db.groups().reject_group(group_id)? {
            return Err(Error::GroupNotFound(group_id.to_string()));
        }
        info!("Rejected group {}", group_id);
        Ok(())
    }

    pub fn get_groups(&self) -> Result<Vec<Group>, Error> {
        Ok(self.db.groups().get_all_groups()?)
    }

    pub fn get_latest_session(&self) -> Result<Option<AnalysisSession>, Error> {
        Ok(self.db.sessions().get_latest_session()?)
    }

    pub fn list_sessions(&self, limit: usize) -> Result<Vec<AnalysisSession>, Error> {
        Ok(self.db.sessions().list_sessions(limit)?)
    }
}
