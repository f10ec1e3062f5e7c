use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event identifier, assigned from a monotonic counter starting at 1.
pub type FileEventId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Created,
    Modified,
    /// Terminal: nothing may follow a deletion in the same chain.
    Deleted,
}

impl std::fmt::Display for FileEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileEventKind::Created => write!(f, "created"),
            FileEventKind::Modified => write!(f, "modified"),
            FileEventKind::Deleted => write!(f, "deleted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Directory,
    Symlink,
    Other,
}

/// Basic attributes captured when a change is detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    pub file_type: FileType,
}

impl FileAttributes {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let file_type = if meta.is_file() {
            FileType::File
        } else if meta.is_dir() {
            FileType::Directory
        } else if meta.file_type().is_symlink() {
            FileType::Symlink
        } else {
            FileType::Other
        };

        Self {
            size: meta.len(),
            created: meta.created().ok().map(DateTime::<Utc>::from),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            file_type,
        }
    }
}

/// What the detector saw for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Present {
        attributes: FileAttributes,
        md5: String,
    },
    Absent,
}

/// One entry in a file's append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEventDto {
    pub file_event_id: FileEventId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_file_event_id: Option<FileEventId>,
    pub folder_id: String,
    pub file_id: String,
    pub kind: FileEventKind,
    /// For deletions, the attributes last seen before the file went away.
    pub attributes: FileAttributes,
    pub file_md5_checksum: String,
    pub detected_at: DateTime<Utc>,
}

impl FileEventDto {
    pub fn is_deletion(&self) -> bool {
        self.kind == FileEventKind::Deleted
    }
}
