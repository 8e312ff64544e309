use crate::config::AnalysisConfig;
use crate::database::models::Photo;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Library root not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletionReport {
    pub deleted: Vec<String>,
    /// `(photo id, message)` for every id that could not be deleted.
    pub errors: Vec<(String, String)>,
}

/// Device photo library. Enumerates assets and deletes them on request.
pub trait PhotoLibrary: Send + Sync {
    fn list_photos(&self) -> Result<Vec<Photo>, LibraryError>;

    fn delete_photos(&self, ids: &[String]) -> DeletionReport;
}

/// Photo library backed by a directory tree.
pub struct FsLibrary {
    root: PathBuf,
    config: AnalysisConfig,
    known: Mutex<HashMap<String, PathBuf>>,
}

impl FsLibrary {
    pub fn new(root: impl Into<PathBuf>, config: &AnalysisConfig) -> Self {
        Self {
            root: root.into(),
            config: config.clone(),
            known: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.config.is_supported_extension(ext))
    }

    fn read_photo(&self, path: &Path) -> Result<Photo, LibraryError> {
        let canonical = fs::canonicalize(path)?;
        let metadata = fs::metadata(&canonical)?;

        let mut photo = Photo::new(
            library_id(&canonical),
            canonical.to_string_lossy(),
            metadata.len(),
        );
        photo.modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);
        photo.created_at = metadata
            .created()
            .ok()
            .map(DateTime::<Utc>::from)
            .or(photo.modified_at);

        // Undecodable headers leave dimensions at zero
        match image::image_dimensions(&canonical) {
            Ok((width, height)) => {
                photo.width = width;
                photo.height = height;
            }
            Err(e) => debug!("No dimensions for {}: {}", canonical.display(), e),
        }

        Ok(photo)
    }
}

/// `pho_` plus the first 128 bits of the blake3 hash of the canonical path.
pub fn library_id(canonical: &Path) -> String {
    let hash = blake3::hash(canonical.to_string_lossy().as_bytes());
    format!("pho_{}", &hash.to_hex()[..32])
}

impl PhotoLibrary for FsLibrary {
    fn list_photos(&self) -> Result<Vec<Photo>, LibraryError> {
        if !self.root.is_dir() {
            return Err(LibraryError::NotFound(self.root.display().to_string()));
        }

        let mut photos = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.is_supported(entry.path()) {
                continue;
            }
            match self.read_photo(entry.path()) {
                Ok(photo) => photos.push(photo),
                Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }

        let mut known = match self.known.lock() {
            Ok(known) => known,
            Err(poisoned) => poisoned.into_inner(),
        };
        for photo in &photos {
            known.insert(photo.library_id.clone(), PathBuf::from(&photo.path));
        }
        drop(known);

        debug!("Listed {} photos under {}", photos.len(), self.root.display());
        Ok(photos)
    }

    /// Ids not seen by an earlier listing trigger one rescan of the root.
    fn delete_photos(&self, ids: &[String]) -> DeletionReport {
        let mut report = DeletionReport::default();

        let needs_scan = match self.known.lock() {
            Ok(known) => ids.iter().any(|id| !known.contains_key(id)),
            Err(_) => true,
        };
        if needs_scan {
            if let Err(e) = self.list_photos() {
                warn!("Could not rescan {}: {}", self.root.display(), e);
            }
        }

        let known = match self.known.lock() {
            Ok(known) => known,
            Err(poisoned) => poisoned.into_inner(),
        };

        for id in ids {
            let Some(path) = known.get(id) else {
                report
                    .errors
                    .push((id.clone(), "not found in library".to_string()));
                continue;
            };
            match fs::remove_file(path) {
                Ok(()) => report.deleted.push(id.clone()),
                Err(e) => report.errors.push((id.clone(), e.to_string())),
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_png(path: &Path, width: u32, height: u32) {
        let img: RgbImage = ImageBuffer::from_pixel(width, height, Rgb([10, 20, 30]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_list_filters_formats_and_reads_dimensions() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("2024");
        fs::create_dir_all(&nested).unwrap();
        write_png(&temp_dir.path().join("b.png"), 8, 6);
        write_png(&nested.join("a.PNG"), 4, 4);
        fs::write(temp_dir.path().join("notes.txt"), b"hello").unwrap();

        let library = FsLibrary::new(temp_dir.path(), &AnalysisConfig::default());
        let photos = library.list_photos().unwrap();

        assert_eq!(photos.len(), 2);
        let b = photos.iter().find(|p| p.name == "b.png").unwrap();
        assert_eq!((b.width, b.height), (8, 6));
        assert!(b.library_id.starts_with("pho_"));
        assert_eq!(b.library_id.len(), 36);
        assert!(b.modified_at.is_some());
    }

    #[test]
    fn test_ids_are_stable() {
        let temp_dir = TempDir::new().unwrap();
        write_png(&temp_dir.path().join("a.png"), 2, 2);

        let library = FsLibrary::new(temp_dir.path(), &AnalysisConfig::default());
        let first = library.list_photos().unwrap();
        let second = library.list_photos().unwrap();
        assert_eq!(first[0].library_id, second[0].library_id);
    }

    #[test]
    fn test_delete_photos() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.png");
        write_png(&path, 2, 2);

        let library = FsLibrary::new(temp_dir.path(), &AnalysisConfig::default());
        let id = library.list_photos().unwrap()[0].library_id.clone();

        let report = library.delete_photos(&[id.clone(), "pho_unknown".to_string()]);
        assert_eq!(report.deleted, vec![id.clone()]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, "pho_unknown");
        assert!(!path.exists());

        let again = library.delete_photos(&[id]);
        assert!(again.deleted.is_empty());
        assert_eq!(again.errors.len(), 1);
    }

    #[test]
    fn test_delete_without_prior_listing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.png");
        write_png(&path, 2, 2);
        let id = library_id(&fs::canonicalize(&path).unwrap());

        let fresh = FsLibrary::new(temp_dir.path(), &AnalysisConfig::default());
        let report = fresh.delete_photos(&[id.clone()]);
        assert_eq!(report.deleted, vec![id]);
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_root() {
        let library = FsLibrary::new("/definitely/not/here", &AnalysisConfig::default());
        assert!(matches!(
            library.list_photos(),
            Err(LibraryError::NotFound(_))
        ));
    }
}
