use crate::core::fingerprint::{Fingerprint, FingerprintKind};
use crate::database::models::Photo;
use crate::database::repositories::PhotoRepository;
use crate::error::Error;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedPhoto {
    pub library_id: String,
    pub size: u64,
    pub fingerprint: Option<Fingerprint>,
    pub kind: Option<FingerprintKind>,
}

/// Snapshot of every known photo, read once per analysis run and dropped
/// with it. Iteration follows the store's read order.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: Vec<CachedPhoto>,
    index: HashMap<String, usize>,
}

impl MetadataCache {
    pub fn load(photos: &PhotoRepository<'_>) -> Result<Self, Error> {
        Self::from_photos(photos.find_all_active()?)
    }

    /// Stored fingerprints must already be normalized; a malformed one
    /// aborts the load.
    pub fn from_photos(photos: Vec<Photo>) -> Result<Self, Error> {
        let mut cache = Self::default();
        for photo in photos {
            let fingerprint = match &photo.fingerprint {
                Some(raw) => Some(raw.parse::<Fingerprint>()?),
                None => None,
            };
            cache
                .index
                .insert(photo.library_id.clone(), cache.entries.len());
            cache.entries.push(CachedPhoto {
                library_id: photo.library_id,
                size: photo.size,
                fingerprint,
                kind: photo.fingerprint_kind,
            });
        }
        Ok(cache)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Batch members that carry a fingerprint, in cache order whatever the
    /// order of `batch`. Unknown ids are skipped.
    pub fn fingerprinted(&self, batch: &[String]) -> Vec<&CachedPhoto> {
        let mut positions: Vec<usize> = batch
            .iter()
            .filter_map(|id| self.index.get(id).copied())
            .collect();
        positions.sort_unstable();
        positions.dedup();

        positions
            .into_iter()
            .map(|i| &self.entries[i])
            .filter(|p| p.fingerprint.is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[test]
    fn test_load_keeps_read_order() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.photos();
        repo.upsert(&Photo::new("pho_b", "/b.jpg", 2).with_fingerprint("b".repeat(64)))
            .unwrap();
        repo.upsert(&Photo::new("pho_a", "/a.jpg", 1).with_fingerprint("a".repeat(64)))
            .unwrap();

        let cache = MetadataCache::load(&repo).unwrap();
        assert_eq!(cache.len(), 2);

        // Batch order does not matter, cache order does
        let batch = vec!["pho_a".to_string(), "pho_b".to_string()];
        let ids: Vec<&str> = cache
            .fingerprinted(&batch)
            .iter()
            .map(|p| p.library_id.as_str())
            .collect();
        assert_eq!(ids, vec!["pho_b", "pho_a"]);
    }

    #[test]
    fn test_fingerprinted_filters_batch() {
        let cache = MetadataCache::from_photos(vec![
            Photo::new("pho_1", "/1.jpg", 1).with_fingerprint("1".repeat(64)),
            Photo::new("pho_2", "/2.jpg", 2),
            Photo::new("pho_3", "/3.jpg", 3).with_fingerprint("3".repeat(64)),
        ])
        .unwrap();

        let batch = vec![
            "pho_3".to_string(),
            "pho_2".to_string(),
            "pho_3".to_string(),
            "pho_missing".to_string(),
        ];
        let selected = cache.fingerprinted(&batch);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].library_id, "pho_3");
        assert_eq!(selected[0].size, 3);
    }

    #[test]
    fn test_malformed_stored_fingerprint_fails() {
        let result =
            MetadataCache::from_photos(vec![Photo::new("pho_1", "/1.jpg", 1).with_fingerprint("abc")]);
        assert!(matches!(result, Err(Error::MalformedFingerprint { .. })));
    }
}
