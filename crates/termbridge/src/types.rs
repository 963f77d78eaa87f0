//! Core data types for transfers, terminals, and profiles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which way a transfer moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// Local file → remote path.
    Upload,
    /// Remote file → local path.
    Download,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Download => write!(f, "download"),
        }
    }
}

/// Lifecycle state of a transfer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    /// Completed, failed, and cancelled tasks never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Snapshot of one upload or download.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTask {
    pub id: String,
    pub direction: TransferDirection,
    pub local_path: String,
    pub remote_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_session_id: Option<String>,
    pub status: TransferStatus,
    pub progress_percent: u8,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub throughput_bytes_per_sec: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Which tasks `TransferManager::list` returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferFilter {
    #[default]
    All,
    /// Pending or running.
    Active,
    Completed,
    Failed,
}

impl TransferFilter {
    pub fn matches(self, status: TransferStatus) -> bool {
        match self {
            Self::All => true,
            Self::Active => status.is_active(),
            Self::Completed => status == TransferStatus::Completed,
            Self::Failed => status == TransferStatus::Failed,
        }
    }
}

impl std::str::FromStr for TransferFilter {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(BridgeError::InvalidInput(format!(
                "Unknown transfer filter: {other}. Use 'all', 'active', 'completed' or 'failed'."
            ))),
        }
    }
}

/// Metadata for one file-system entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStat {
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

/// One row of a directory listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// A saved connection profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub name: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_path: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

/// Errors that can occur in the core library.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File too large for {direction}: {size} bytes exceeds the configured limit of {limit} bytes")]
    FileTooLarge {
        direction: TransferDirection,
        size: u64,
        limit: u64,
    },

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Transfer {id} cannot be cancelled in state '{status}'")]
    InvalidState { id: String, status: TransferStatus },

    #[error("Source not found: {0}")]
    SourceMissing(String),

    #[error("Path escapes the file-system root: {0}")]
    PathEscape(String),

    #[error("Terminal not found: {0}")]
    TerminalNotFound(String),

    #[error("Terminal error: {0}")]
    Terminal(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience result type.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches() {
        assert!(TransferFilter::Active.matches(TransferStatus::Pending));
        assert!(TransferFilter::Active.matches(TransferStatus::Running));
        assert!(!TransferFilter::Active.matches(TransferStatus::Cancelled));
        assert!(TransferFilter::Failed.matches(TransferStatus::Failed));
        assert!(TransferFilter::All.matches(TransferStatus::Cancelled));
    }

    #[test]
    fn test_filter_parse() {
        assert_eq!("active".parse::<TransferFilter>().unwrap(), TransferFilter::Active);
        assert!("bogus".parse::<TransferFilter>().is_err());
    }

    #[test]
    fn test_task_serializes_camel_case() {
        let task = TransferTask {
            id: "t1".into(),
            direction: TransferDirection::Upload,
            local_path: "/a".into(),
            remote_path: "/b".into(),
            owner_session_id: None,
            status: TransferStatus::Running,
            progress_percent: 50,
            bytes_transferred: 5,
            total_bytes: 10,
            throughput_bytes_per_sec: 5,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
        };
        let v = serde_json::to_value(&task).unwrap();
        assert_eq!(v["progressPercent"], 50);
        assert_eq!(v["status"], "running");
        assert_eq!(v["direction"], "upload");
        assert!(v.get("endedAt").is_none());
    }

    #[test]
    fn test_profile_default_port() {
        let p: Profile = serde_json::from_str(r#"{"name":"prod","host":"example.org"}"#).unwrap();
        assert_eq!(p.port, 22);
    }
}
