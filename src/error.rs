//! Error type shared by the parsing, collapsing and writing layers.
//!
//! Every failure carries enough context (line number, group key or path) to
//! be diagnosed without re-running. The console maps each variant to a
//! distinct process exit code with [`CollapseError::exit_code`].

use std::io;
use std::path::{
    Path,
    PathBuf,
};

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CollapseError>;

#[derive(Error, Debug)]
pub enum CollapseError {
    /// An input row could not be turned into a typed record.
    #[error("Malformed record at line {line}, field '{field}': {reason}")]
    MalformedRecord {
        /// 1-based line number in the input table
        line:   u64,
        /// Column name of the offending field
        field:  String,
        /// What was wrong with it
        reason: String,
    },

    /// A group (or a whole partition) reappeared after it was closed.
    #[error(
        "Group {key} reappeared after it was closed; input is not sorted by \
         group key (use the sort-first mode for unsorted input)"
    )]
    NonContiguousGroup {
        /// Debug rendering of the offending key
        key: String,
    },

    /// An aggregator was closed without a single record folded into it.
    #[error("Attempted to close an empty group {key}")]
    EmptyGroup { key: String },

    /// The run finished without producing a single summary.
    #[error("No groups were produced from {}", .path.display())]
    EmptyOutput { path: PathBuf },

    #[error("I/O failure on {}{}: {source}", .path.display(), fmt_offset(.offset))]
    Io {
        path:   PathBuf,
        /// Byte or line offset reached when the failure happened, if known
        offset: Option<u64>,
        #[source]
        source: io::Error,
    },

    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidConfig {
        parameter: String,
        reason:    String,
    },

    /// The run was cancelled; the in-flight group was discarded.
    #[error("Cancelled; in-flight group discarded")]
    Cancelled,

    /// Internal invariant violation (worker panic, use after drain).
    #[error("Internal error: {0}")]
    Internal(String),
}

fn fmt_offset(offset: &Option<u64>) -> String {
    match offset {
        Some(offset) => format!(" at offset {offset}"),
        None => String::new(),
    }
}

impl CollapseError {
    pub fn io<P: AsRef<Path>>(
        path: P,
        source: io::Error,
    ) -> Self {
        CollapseError::Io {
            path: path.as_ref().to_path_buf(),
            offset: None,
            source,
        }
    }

    pub fn io_at<P: AsRef<Path>>(
        path: P,
        offset: u64,
        source: io::Error,
    ) -> Self {
        CollapseError::Io {
            path: path.as_ref().to_path_buf(),
            offset: Some(offset),
            source,
        }
    }

    pub fn malformed(
        line: u64,
        field: &str,
        reason: impl Into<String>,
    ) -> Self {
        CollapseError::MalformedRecord {
            line,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(
        parameter: &str,
        reason: impl Into<String>,
    ) -> Self {
        CollapseError::InvalidConfig {
            parameter: parameter.to_string(),
            reason:    reason.into(),
        }
    }

    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            CollapseError::MalformedRecord { .. } => 2,
            CollapseError::NonContiguousGroup { .. } => 3,
            CollapseError::EmptyOutput { .. } => 4,
            CollapseError::Io { .. } => 5,
            CollapseError::InvalidConfig { .. } => 6,
            CollapseError::EmptyGroup { .. } => 70,
            CollapseError::Internal(_) => 71,
            CollapseError::Cancelled => 130,
        }
    }
}
