//! Grouping engine.
//!
//! One run fingerprints whatever the batch is missing, snapshots the store
//! into a [`MetadataCache`], clusters the fingerprinted batch by seed
//! expansion and writes each cluster into the group store. Clustering is
//! single-pass: every unprocessed photo becomes a seed and absorbs the
//! remaining unprocessed photos within the threshold of that seed only, so
//! similarity chains (A~B, B~C, A!~C) are not closed transitively.

use crate::config::AnalysisConfig;
use crate::core::cache::{CachedPhoto, MetadataCache};
use crate::core::fingerprint::{ComputedFingerprint, Fingerprint, FingerprintKind, Fingerprinter};
use crate::database::models::{Group, Photo};
use crate::database::repositories::GroupRepository;
use crate::database::Database;
use crate::error::{Error, FailureKind, FingerprintError, ItemFailure};
use crate::progress::{AnalysisProgress, AnalysisStage, CancellationToken, ProgressReporter};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Photos judged duplicates of one seed. Members are in cache order with
/// the seed first.
#[derive(Debug, Clone)]
pub struct Cluster<'a> {
    pub members: Vec<&'a CachedPhoto>,
}

impl Cluster<'_> {
    /// Lexically smallest member fingerprint, stable across runs over the
    /// same content.
    pub fn group_key(&self) -> Option<String> {
        self.members
            .iter()
            .filter_map(|p| p.fingerprint)
            .min()
            .map(|fp| fp.to_hex())
    }

    /// Largest member; on a tie the first in cache order.
    pub fn recommended_keep(&self) -> Option<&CachedPhoto> {
        let mut best: Option<&CachedPhoto> = None;
        for photo in self.members.iter().copied() {
            if best.is_none_or(|b| photo.size > b.size) {
                best = Some(photo);
            }
        }
        best
    }

    pub fn member_ids(&self) -> Vec<String> {
        self.members.iter().map(|p| p.library_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Seed-expansion clustering over `photos` in the given order. Only
/// fingerprints of the same kind are compared and singletons are dropped.
/// Returns `None` when cancelled between seeds.
pub fn cluster_photos<'a>(
    photos: &[&'a CachedPhoto],
    threshold: u32,
    cancel: &CancellationToken,
) -> Option<Vec<Cluster<'a>>> {
    let mut processed = vec![false; photos.len()];
    let mut clusters = Vec::new();

    for (i, seed) in photos.iter().enumerate() {
        if processed[i] {
            continue;
        }
        if cancel.is_cancelled() {
            return None;
        }
        processed[i] = true;

        let Some(seed_fp) = seed.fingerprint else {
            continue;
        };

        let mut members = vec![*seed];
        for (j, candidate) in photos.iter().enumerate().skip(i + 1) {
            if processed[j] || candidate.kind != seed.kind {
                continue;
            }
            let Some(fp) = candidate.fingerprint else {
                continue;
            };
            if seed_fp.distance(&fp) <= threshold {
                processed[j] = true;
                members.push(*candidate);
            }
        }

        if members.len() > 1 {
            clusters.push(Cluster { members });
        }
    }

    Some(clusters)
}

/// Outcome of one grouping run.
#[derive(Debug, Clone, Default)]
pub struct GroupingReport {
    /// Groups created or merged into by this run, live members joined.
    pub groups: Vec<Group>,
    pub failures: Vec<ItemFailure>,
    /// Batch photos that reached clustering with a usable fingerprint.
    pub analyzed: usize,
    /// Fingerprints computed this run through the metadata fallback.
    pub degraded: usize,
    pub bytes_analyzed: u64,
    pub cancelled: bool,
}

impl GroupingReport {
    pub fn duplicates_found(&self) -> u64 {
        self.groups.iter().map(|g| u64::from(g.duplicate_count())).sum()
    }

    pub fn potential_space_saved(&self) -> u64 {
        self.groups.iter().map(Group::potential_savings).sum()
    }
}

pub struct GroupingEngine<'a> {
    db: &'a Database,
    fingerprinter: &'a dyn Fingerprinter,
    config: &'a AnalysisConfig,
}

impl<'a> GroupingEngine<'a> {
    pub fn new(
        db: &'a Database,
        fingerprinter: &'a dyn Fingerprinter,
        config: &'a AnalysisConfig,
    ) -> Self {
        Self {
            db,
            fingerprinter,
            config,
        }
    }

    /// Run the full pipeline over `photos`. Per-photo and per-group failures
    /// are collected in the report; store failures outside a single group
    /// abort the run.
    pub fn analyze(
        &self,
        photos: &[Photo],
        clear_existing: bool,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<GroupingReport, Error> {
        let mut report = GroupingReport {
            bytes_analyzed: photos.iter().map(|p| p.size).sum(),
            ..GroupingReport::default()
        };

        if clear_existing {
            let cleared = self.db.groups().clear_all_groups()?;
            info!("Cleared {} existing groups before analysis", cleared);
        }

        let batch: Vec<Photo> = photos.iter().map(normalized).collect();
        self.db.photos().upsert_batch(&batch)?;

        let ids: Vec<String> = batch.iter().map(|p| p.library_id.clone()).collect();
        let pending: Vec<Photo> = self
            .db
            .photos()
            .find_by_ids(&ids)?
            .into_iter()
            .filter(|p| p.fingerprint.is_none())
            .collect();

        info!(
            "Fingerprinting {} of {} photos with {} workers",
            pending.len(),
            batch.len(),
            self.config.parallel_workers
        );
        let computed = self.fingerprint_pending(&pending, reporter, cancel)?;
        self.persist_fingerprints(computed, &mut report);

        if cancel.is_cancelled() {
            info!("Analysis cancelled during fingerprinting");
            report.cancelled = true;
            return Ok(report);
        }
        if report.degraded > 0 {
            warn!(
                "{} photos fell back to metadata fingerprints and only match each other",
                report.degraded
            );
        }

        let cache = MetadataCache::load(&self.db.photos())?;
        let candidates = cache.fingerprinted(&ids);
        debug!(
            "Cached {} photos, {} batch photos fingerprinted",
            cache.len(),
            candidates.len()
        );
        report.analyzed = candidates.len();

        reporter.on_progress(&AnalysisProgress::new(
            AnalysisStage::Grouping,
            0,
            candidates.len(),
        ));
        let threshold = self.config.near_duplicate_threshold;
        let Some(clusters) = cluster_photos(&candidates, threshold, cancel) else {
            info!("Analysis cancelled during clustering");
            report.cancelled = true;
            return Ok(report);
        };
        info!(
            "Found {} clusters among {} photos at threshold {}",
            clusters.len(),
            candidates.len(),
            threshold
        );

        let groups = self.db.groups();
        let mut touched: Vec<String> = Vec::new();
        for (i, cluster) in clusters.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Analysis cancelled after {} of {} groups", i, clusters.len());
                report.cancelled = true;
                break;
            }

            match persist_cluster(&groups, cluster) {
                Ok(group_id) => {
                    if !touched.contains(&group_id) {
                        touched.push(group_id);
                    }
                }
                Err(err) => {
                    warn!("{}", err);
                    report.failures.extend(ItemFailure::from_error(&err));
                }
            }

            reporter.on_progress(&AnalysisProgress::new(
                AnalysisStage::Persisting,
                i + 1,
                clusters.len(),
            ));
        }

        for group_id in &touched {
            if let Some(group) = groups.find_by_id(group_id)? {
                report.groups.push(group);
            }
        }

        Ok(report)
    }

    /// Fingerprint photos on a bounded pool. Photos skipped after a
    /// cancellation come back as `None`.
    fn fingerprint_pending(
        &self,
        pending: &[Photo],
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, Option<Result<ComputedFingerprint, FingerprintError>>)>, Error> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallel_workers.max(1))
            .build()?;

        let fingerprinter = self.fingerprinter;
        let total = pending.len();
        let done = AtomicUsize::new(0);

        Ok(pool.install(|| {
            pending
                .par_iter()
                .map(|photo| {
                    if cancel.is_cancelled() {
                        return (photo.library_id.clone(), None);
                    }
                    let result = fingerprinter.fingerprint(photo);
                    let processed = done.fetch_add(1, Ordering::SeqCst) + 1;
                    reporter.on_progress(&AnalysisProgress::new(
                        AnalysisStage::Fingerprinting,
                        processed,
                        total,
                    ));
                    (photo.library_id.clone(), Some(result))
                })
                .collect()
        }))
    }

    fn persist_fingerprints(
        &self,
        computed: Vec<(String, Option<Result<ComputedFingerprint, FingerprintError>>)>,
        report: &mut GroupingReport,
    ) {
        let photos = self.db.photos();
        for (photo_id, result) in computed {
            match result {
                None => {}
                Some(Ok(c)) => {
                    if let Err(e) = photos.set_fingerprint(&photo_id, &c.fingerprint, c.kind) {
                        warn!("Failed to store fingerprint for {}: {}", photo_id, e);
                        report.failures.push(ItemFailure {
                            kind: FailureKind::Fingerprint,
                            subject: photo_id,
                            message: e.to_string(),
                        });
                    } else if c.kind == FingerprintKind::Metadata {
                        report.degraded += 1;
                    }
                }
                Some(Err(source)) => {
                    let err = Error::PhotoFingerprint { photo_id, source };
                    warn!("{}", err);
                    report.failures.extend(ItemFailure::from_error(&err));
                }
            }
        }
    }
}

/// Copy of `photo` with any caller-supplied fingerprint brought to the
/// fixed length. Such fingerprints count as visual unless tagged.
fn normalized(photo: &Photo) -> Photo {
    let mut photo = photo.clone();
    if let Some(raw) = &photo.fingerprint {
        photo.fingerprint = Some(Fingerprint::normalize(raw).to_hex());
        photo.fingerprint_kind = photo.fingerprint_kind.or(Some(FingerprintKind::Visual));
    }
    photo
}

/// Write one cluster: merge into the group holding its key, else into a
/// group already holding one of its members, else create a new group.
fn persist_cluster(groups: &GroupRepository<'_>, cluster: &Cluster<'_>) -> Result<String, Error> {
    let group_key = cluster.group_key().unwrap_or_default();
    let keep = cluster
        .recommended_keep()
        .map(|p| p.library_id.clone())
        .unwrap_or_default();

    let write = groups
        .write_cluster(&group_key, &cluster.member_ids(), &keep)
        .map_err(|source| Error::GroupPersistence {
            group_key: group_key.clone(),
            source,
        })?;

    for (other, refresh) in &write.detached {
        debug!("Cluster {} took members from {} ({:?})", group_key, other, refresh);
    }
    if write.created {
        debug!("Cluster {} created {}", group_key, write.group_id);
    } else {
        debug!(
            "Cluster {} merged into {} (+{}, keep {:?})",
            group_key,
            write.group_id,
            write.outcome.added.len(),
            write.outcome.recommended_keep_id
        );
    }
    Ok(write.group_id)
}
