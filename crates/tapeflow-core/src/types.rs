//! Core types for TapeFlow
//!
//! Shared enumerations used across the scheduler, the backup pipeline and
//! the persistence layer. All enums are stored as lowercase text in the
//! database and round-tripped through `Display`/`FromStr`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TapeflowError;

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant,)+
        }

        impl $name {
            /// Database/text representation
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = TapeflowError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(TapeflowError::Deserialization(format!(
                        concat!("unknown ", stringify!($name), " value: {}"),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum! {
    /// How a scheduled task computes its next run time
    ScheduleType {
        Once => "once",
        Interval => "interval",
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
        Yearly => "yearly",
        Cron => "cron",
    }
}

text_enum! {
    /// What a scheduled task does when it fires
    ActionKind {
        Backup => "backup",
        Recovery => "recovery",
        Cleanup => "cleanup",
        HealthCheck => "health_check",
        RetentionCheck => "retention_check",
        Custom => "custom",
    }
}

text_enum! {
    /// Lifecycle state of a scheduled task
    ScheduledTaskStatus {
        Active => "active",
        Inactive => "inactive",
        Running => "running",
        Paused => "paused",
        Error => "error",
    }
}

text_enum! {
    /// Outcome state of one execution attempt
    RunStatus {
        Running => "running",
        Success => "success",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

text_enum! {
    /// Kind of backup a template describes
    BackupTaskType {
        Full => "full",
        Incremental => "incremental",
        Differential => "differential",
        MonthlyFull => "monthly_full",
    }
}

text_enum! {
    /// Lifecycle state of a backup task execution record
    BackupTaskStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
        Paused => "paused",
    }
}

text_enum! {
    /// Lifecycle state of a backup set
    BackupSetStatus {
        Active => "active",
        Archived => "archived",
        Corrupted => "corrupted",
        Deleted => "deleted",
    }
}

text_enum! {
    /// File-scanner handshake state for one backup execution
    ScanStatus {
        Pending => "pending",
        Scanning => "scanning",
        Completed => "completed",
    }
}

text_enum! {
    /// Filesystem object kind recorded per backup file
    FileKind {
        File => "file",
        Directory => "directory",
        Symlink => "symlink",
    }
}

text_enum! {
    /// Coarse stage of a backup execution, for progress reporting
    OperationStage {
        Scan => "scan",
        Compress => "compress",
        Copy => "copy",
        Finalize => "finalize",
    }
}

text_enum! {
    /// State of a tape cartridge in the registry
    TapeStatus {
        New => "new",
        Available => "available",
        InUse => "in_use",
        Full => "full",
        Expired => "expired",
        Error => "error",
        Maintenance => "maintenance",
        Retired => "retired",
    }
}

text_enum! {
    /// Archive container/codec written by the compressor stage
    ArchiveCodec {
        TarGz => "tar.gz",
        TarZst => "tar.zst",
        Tar => "tar",
    }
}

impl ArchiveCodec {
    /// File extension, without a leading dot
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_round_trip() {
        for kind in [
            ActionKind::Backup,
            ActionKind::Recovery,
            ActionKind::Cleanup,
            ActionKind::HealthCheck,
            ActionKind::RetentionCheck,
            ActionKind::Custom,
        ] {
            assert_eq!(ActionKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert_eq!(
            ScheduleType::from_str("monthly").unwrap(),
            ScheduleType::Monthly
        );
        assert_eq!(TapeStatus::from_str("in_use").unwrap(), TapeStatus::InUse);
    }

    #[test]
    fn test_unknown_value_rejected() {
        assert!(ScheduleType::from_str("fortnightly").is_err());
        assert!(ActionKind::from_str("").is_err());
    }

    #[test]
    fn test_serde_matches_text() {
        let json = serde_json::to_string(&ActionKind::HealthCheck).unwrap();
        assert_eq!(json, "\"health_check\"");
        let back: ActionKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ActionKind::HealthCheck);
    }

    #[test]
    fn test_codec_extension() {
        assert_eq!(ArchiveCodec::TarGz.extension(), "tar.gz");
        assert_eq!(ArchiveCodec::TarZst.extension(), "tar.zst");
        assert_eq!(ArchiveCodec::Tar.extension(), "tar");
    }
}
