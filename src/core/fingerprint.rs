//! Photo fingerprints.
//!
//! A fingerprint is a 256-bit value carried as 64 lowercase hex characters.
//! Everything that reaches storage or comparison goes through
//! [`Fingerprint::normalize`] or the strict [`FromStr`] parser, so two
//! fingerprints always have the same length.
//!
//! Two producers exist:
//!
//! - the visual path hashes the decoded pixels at a coarse (8x8) and a fine
//!   (16x12) resolution with a gradient hash and concatenates the results;
//! - the metadata path, used only when decoding fails, hashes pixel count,
//!   aspect ratio and a size bucket. It cannot tell apart distinct photos
//!   with the same dimensions, so it is tagged [`FingerprintKind::Metadata`]
//!   and never compared against visual fingerprints.

use crate::database::models::Photo;
use crate::error::{Error, FingerprintError};
use image::ImageReader;
use image_hasher::{HashAlg, Hasher, HasherConfig};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const FINGERPRINT_BITS: usize = 256;
pub const FINGERPRINT_BYTES: usize = FINGERPRINT_BITS / 8;
pub const FINGERPRINT_HEX_LEN: usize = FINGERPRINT_BITS / 4;

/// Fixed-length fingerprint. Byte order matches the hex string, so `Ord`
/// agrees with lexical order of the hex form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_BYTES]);

impl Fingerprint {
    /// Truncate or zero-pad raw hash bytes to the fixed length.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut out = [0u8; FINGERPRINT_BYTES];
        let len = bytes.len().min(FINGERPRINT_BYTES);
        out[..len].copy_from_slice(&bytes[..len]);
        Self(out)
    }

    /// Coerce any string to a valid fingerprint: lowercase, non-hex
    /// characters become `0`, then truncate or pad with `0`.
    pub fn normalize(raw: &str) -> Self {
        let mut hex: String = raw
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_hexdigit() {
                    c.to_ascii_lowercase()
                } else {
                    '0'
                }
            })
            .take(FINGERPRINT_HEX_LEN)
            .collect();
        while hex.len() < FINGERPRINT_HEX_LEN {
            hex.push('0');
        }
        Self::parse_hex(&hex).unwrap_or(Self([0; FINGERPRINT_BYTES]))
    }

    fn parse_hex(hex: &str) -> Option<Self> {
        if hex.len() != FINGERPRINT_HEX_LEN || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut out = [0u8; FINGERPRINT_BYTES];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_BYTES] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    /// Strict parse: exactly 64 hex characters, either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hex(&s.to_ascii_lowercase()).ok_or_else(|| Error::MalformedFingerprint {
            value: s.to_string(),
            expected: FINGERPRINT_HEX_LEN,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FingerprintKind {
    Visual,
    /// Degraded: derived from dimensions and size only.
    Metadata,
}

impl FingerprintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintKind::Visual => "visual",
            FingerprintKind::Metadata => "metadata",
        }
    }
}

impl From<String> for FingerprintKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "metadata" => FingerprintKind::Metadata,
            _ => FingerprintKind::Visual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputedFingerprint {
    pub fingerprint: Fingerprint,
    pub kind: FingerprintKind,
}

/// Pluggable fingerprint strategy. Must be deterministic for identical
/// content and ignore path, name and timestamps.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, photo: &Photo) -> Result<ComputedFingerprint, FingerprintError>;
}

/// Gradient hashes of the decoded image at two resolutions, with an
/// optional metadata fallback for undecodable files.
pub struct ImageFingerprinter {
    coarse: Hasher,
    fine: Hasher,
    allow_fallback: bool,
}

impl ImageFingerprinter {
    pub fn new(allow_fallback: bool) -> Self {
        Self {
            coarse: HasherConfig::new()
                .hash_alg(HashAlg::Gradient)
                .hash_size(8, 8)
                .to_hasher(),
            fine: HasherConfig::new()
                .hash_alg(HashAlg::Gradient)
                .hash_size(16, 12)
                .to_hasher(),
            allow_fallback,
        }
    }

    pub fn visual_fingerprint(&self, path: &Path) -> Result<Fingerprint, FingerprintError> {
        let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;

        let coarse = self.coarse.hash_image(&image);
        let fine = self.fine.hash_image(&image);

        let mut bytes = Vec::with_capacity(FINGERPRINT_BYTES);
        bytes.extend_from_slice(coarse.as_bytes());
        bytes.extend_from_slice(fine.as_bytes());
        Ok(Fingerprint::from_bytes(&bytes))
    }
}

impl Default for ImageFingerprinter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Fingerprinter for ImageFingerprinter {
    fn fingerprint(&self, photo: &Photo) -> Result<ComputedFingerprint, FingerprintError> {
        match self.visual_fingerprint(Path::new(&photo.path)) {
            Ok(fingerprint) => Ok(ComputedFingerprint {
                fingerprint,
                kind: FingerprintKind::Visual,
            }),
            Err(err) if self.allow_fallback => {
                let fingerprint = metadata_fingerprint(photo.width, photo.height, photo.size)
                    .ok_or(FingerprintError::InsufficientMetadata {
                        width: photo.width,
                        height: photo.height,
                    })?;
                warn!(
                    "Using metadata fingerprint for {} ({}): {}",
                    photo.library_id, photo.path, err
                );
                Ok(ComputedFingerprint {
                    fingerprint,
                    kind: FingerprintKind::Metadata,
                })
            }
            Err(err) => Err(err),
        }
    }
}

/// Power-of-two size class, so re-encodes of similar weight share a bucket.
fn size_bucket(size: u64) -> u32 {
    64 - size.leading_zeros()
}

/// Degraded fingerprint from dimensions and size. `None` without dimensions.
pub fn metadata_fingerprint(width: u32, height: u32, size: u64) -> Option<Fingerprint> {
    if width == 0 || height == 0 {
        return None;
    }

    let pixels = u64::from(width) * u64::from(height);
    // aspect ratio to two decimals, orientation-independent
    let (long, short) = (width.max(height), width.min(height));
    let aspect = (f64::from(long) / f64::from(short) * 100.0).round() as u64;

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"dupsweep:metadata:v1");
    hasher.update(&pixels.to_le_bytes());
    hasher.update(&aspect.to_le_bytes());
    hasher.update(&size_bucket(size).to_le_bytes());
    Some(Fingerprint::from_bytes(hasher.finalize().as_bytes()))
}
