use crate::core::fingerprint::FingerprintKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const NEUTRAL_QUALITY: f64 = 0.5;

// Photo models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub library_id: String,
    pub path: String,
    pub name: String,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub fingerprint: Option<String>,
    pub fingerprint_kind: Option<FingerprintKind>,
    pub quality_score: f64,
    pub is_duplicate: bool,
    pub is_deleted: bool,
}

impl Photo {
    pub fn new(library_id: impl Into<String>, path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        let name = Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());

        Self {
            library_id: library_id.into(),
            path,
            name,
            size,
            width: 0,
            height: 0,
            created_at: None,
            modified_at: None,
            fingerprint: None,
            fingerprint_kind: None,
            quality_score: NEUTRAL_QUALITY,
            is_duplicate: false,
            is_deleted: false,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }
}

// Group models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub photo: Photo,
    pub is_recommended: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub group_key: String,
    pub member_count: u32,
    pub total_size: u64,
    pub recommended_keep_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Live members, recommended keep first then by quality.
    pub members: Vec<GroupMember>,
}

impl Group {
    pub fn recommended_keep(&self) -> Option<&Photo> {
        self.members
            .iter()
            .find(|m| m.is_recommended)
            .map(|m| &m.photo)
    }

    /// Bytes freed by deleting every member except the recommended keep.
    pub fn potential_savings(&self) -> u64 {
        let keep_size = self.recommended_keep().map(|p| p.size).unwrap_or(0);
        self.total_size.saturating_sub(keep_size)
    }

    pub fn duplicate_count(&self) -> u32 {
        self.member_count.saturating_sub(1)
    }

    pub fn contains(&self, photo_id: &str) -> bool {
        self.members.iter().any(|m| m.photo.library_id == photo_id)
    }
}

// Analysis session models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Running,
    Completed,
    Cancelled,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

impl From<String> for SessionStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "running" => SessionStatus::Running,
            "completed" => SessionStatus::Completed,
            "cancelled" => SessionStatus::Cancelled,
            _ => SessionStatus::Error,
        }
    }
}

impl From<SessionStatus> for String {
    fn from(status: SessionStatus) -> Self {
        status.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSession {
    pub id: String,
    pub total_photos: u64,
    pub analyzed_photos: u64,
    pub duplicates_found: u64,
    pub bytes_analyzed: u64,
    pub bytes_potentially_saved: u64,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: SessionStatus,
    pub error_message: Option<String>,
}

/// Merge patch for a session: only `Some` fields are written.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub analyzed_photos: Option<u64>,
    pub duplicates_found: Option<u64>,
    pub bytes_analyzed: Option<u64>,
    pub bytes_potentially_saved: Option<u64>,
    pub status: Option<SessionStatus>,
    pub error_message: Option<String>,
}
