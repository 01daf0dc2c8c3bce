use crate::core::perceptual::PerceptualHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

// Asset models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub path: PathBuf,
    /// Source root the asset was discovered under.
    pub source_root: PathBuf,
    pub size: u64,
    /// Content fingerprint (hex), present once hashed.
    pub hash: Option<String>,
    /// Present only for files that decoded as images.
    pub perceptual_hash: Option<PerceptualHash>,
    pub width: u32,
    pub height: u32,
    pub exif_data: Option<ExifData>,
    /// Opaque metrics attached by external scorers. Never read by grouping or planning.
    pub quality: Option<QualityMetrics>,
    pub indexed_at: DateTime<Utc>,
}

impl Asset {
    pub fn new(path: &Path, source_root: &Path, size: u64, indexed_at: DateTime<Utc>) -> Self {
        Self {
            id: Self::id_for_path(path),
            path: path.to_path_buf(),
            source_root: source_root.to_path_buf(),
            size,
            hash: None,
            perceptual_hash: None,
            width: 0,
            height: 0,
            exif_data: None,
            quality: None,
            indexed_at,
        }
    }

    /// Stable identifier derived from the absolute path, so rescans keep ids
    /// (and therefore stored decisions) attached to the same file.
    pub fn id_for_path(path: &Path) -> String {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, path.to_string_lossy().as_bytes());
        format!("ast_{}", id.simple())
    }

    pub fn resolution(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Capture time when EXIF has one, indexing time otherwise.
    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        self.exif_data
            .as_ref()
            .and_then(|exif| exif.taken_at)
            .unwrap_or(self.indexed_at)
    }
}

// EXIF data structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExifData {
    pub taken_at: Option<DateTime<Utc>>,
    pub camera: Option<String>,
    pub lens: Option<String>,
    pub iso: Option<u32>,
    pub aperture: Option<f32>,
    pub shutter_speed: Option<String>,
}

impl ExifData {
    pub fn is_empty(&self) -> bool {
        self.taken_at.is_none()
            && self.camera.is_none()
            && self.lens.is_none()
            && self.iso.is_none()
            && self.aperture.is_none()
            && self.shutter_speed.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub overall: f64,
    pub sharpness: f64,
    pub exposure: f64,
    pub composition: f64,
    pub technical_issues: Vec<String>,
}

// Variant group models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantGroup {
    pub id: String,
    pub group_type: GroupType,
    /// 100.0 for exact groups; weakest linking similarity for similar groups.
    pub similarity: f64,
    /// Member ids ordered by source path.
    pub asset_ids: Vec<String>,
    pub suggested_keep: Option<String>,
    pub suggested_reason: Option<ReasonCode>,
}

impl VariantGroup {
    pub fn new(group_type: GroupType, similarity: f64, asset_ids: Vec<String>, seed: &str) -> Self {
        let name = format!("{}:{}", group_type.as_str(), seed);
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
        Self {
            id: format!("grp_{}", id.simple()),
            group_type,
            similarity,
            asset_ids,
            suggested_keep: None,
            suggested_reason: None,
        }
    }

    pub fn contains(&self, asset_id: &str) -> bool {
        self.asset_ids.iter().any(|id| id == asset_id)
    }

    pub fn len(&self) -> usize {
        self.asset_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.asset_ids.is_empty()
    }
}

// Decision models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub asset_id: String,
    pub state: DecisionState,
    pub reason: ReasonCode,
    pub notes: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(
        asset_id: impl Into<String>,
        state: DecisionState,
        reason: ReasonCode,
        notes: Option<String>,
    ) -> Self {
        Self {
            asset_id: asset_id.into(),
            state,
            reason,
            notes,
            decided_at: Utc::now(),
        }
    }

    /// True when both decisions say the same thing, ignoring when they were made.
    pub fn same_verdict(&self, other: &Decision) -> bool {
        self.asset_id == other.asset_id
            && self.state == other.state
            && self.reason == other.reason
            && self.notes == other.notes
    }
}

// Output plan entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMapping {
    pub asset_id: String,
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub operation: OperationKind,
    pub status: EntryStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Copy,
    Hardlink,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed { error: String },
}

impl EntryStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, EntryStatus::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EntryStatus::Failed { .. })
    }
}

// Enums for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    Exact,
    Similar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionState {
    Keep,
    Remove,
    Undecided,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    ExactDuplicate,
    HigherResolution,
    NewerTimestamp,
    LargerFilesize,
    Unique,
    UserOverrideKeep,
    UserOverrideRemove,
    ManualNoReason,
}

macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    other => Err(format!("unknown {}: {}", stringify!($ty), other)),
                }
            }
        }
    };
}

string_enum!(GroupType {
    Exact => "exact",
    Similar => "similar",
});

string_enum!(DecisionState {
    Keep => "keep",
    Remove => "remove",
    Undecided => "undecided",
});

string_enum!(OperationKind {
    Copy => "copy",
    Hardlink => "hardlink",
});

string_enum!(ReasonCode {
    ExactDuplicate => "exact_duplicate",
    HigherResolution => "higher_resolution",
    NewerTimestamp => "newer_timestamp",
    LargerFilesize => "larger_filesize",
    Unique => "unique",
    UserOverrideKeep => "user_override_keep",
    UserOverrideRemove => "user_override_remove",
    ManualNoReason => "manual_no_reason",
});
