//! TapeFlow Core Library
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.3.0
//!
//! Fundamental types shared across the TapeFlow workspace: the error type,
//! the configuration model, shared enumerations and the retry combinator
//! used by the persistence layer.
//!
//! # Examples
//! ```rust
//! use tapeflow_core::{TapeflowConfig, Result};
//!
//! fn example() -> Result<()> {
//!     let config = TapeflowConfig::default();
//!     config.validate()?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::{
    DatabaseConfig, NotifyConfig, PipelineConfig, SchedulerConfig, ServerConfig, TapeConfig,
    TapeflowConfig,
};
pub use error::{Result, TapeflowError};
pub use retry::{retry, RetryPolicy};
pub use types::{
    ActionKind, ArchiveCodec, BackupSetStatus, BackupTaskStatus, BackupTaskType, FileKind,
    OperationStage, RunStatus, ScanStatus, ScheduleType, ScheduledTaskStatus, TapeStatus,
};
