//! Error taxonomy for the Sovereign kernel.
//!
//! Every fallible kernel operation returns `KernelResult<T>`. Command-path
//! errors reach the caller synchronously; replication-path errors are logged
//! and retried on the next round.

use thiserror::Error;

/// The unified error type for the kernel.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The command payload is malformed or missing required fields.
    ///
    /// Raised before any write. The caller may retry with corrected input.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// No handler is registered for the command type.
    #[error("unknown command type '{command_type}'")]
    UnknownCommand { command_type: String },

    /// Derived state could not be updated from an event.
    ///
    /// Aborts the enclosing unit of work; the triggering event is never persisted.
    #[error("projection failed for event '{event_id}': {reason}")]
    Projection { event_id: String, reason: String },

    /// Hash-chain verification found a record whose hash does not match.
    #[error("integrity violation at sequence {sequence}: {reason}")]
    IntegrityViolation { sequence: u64, reason: String },

    /// Two events claim the same identity with different content.
    #[error("replication conflict on event '{event_id}': {reason}")]
    ReplicationConflict { event_id: String, reason: String },

    /// A peer could not be reached or did not answer in time.
    #[error("peer '{node_id}' unreachable: {reason}")]
    PeerUnreachable { node_id: String, reason: String },

    /// The conflict resolver could not pick a winner.
    #[error("conflict resolution failed: {reason}")]
    Resolution { reason: String },

    /// The admission gate refused the command.
    #[error("command rejected: {reason}")]
    Rejected { reason: String },

    /// The admission gate requires sign-off before the command may run.
    #[error("approval by '{approver_role}' required: {reason}")]
    ApprovalRequired { reason: String, approver_role: String },

    /// Another unit of work committed first; the unit was discarded.
    ///
    /// Callers start the unit over against the new committed state.
    #[error("write conflict: {reason}")]
    WriteConflict { reason: String },

    /// The storage layer refused or failed an operation.
    #[error("storage error: {reason}")]
    Storage { reason: String },

    /// A configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },
}

impl KernelError {
    /// Stable taxonomy tag, used in logs and command responses.
    pub fn kind(&self) -> &'static str {
        match self {
            KernelError::Validation { .. } => "ValidationError",
            KernelError::UnknownCommand { .. } => "UnknownCommandError",
            KernelError::Projection { .. } => "ProjectionError",
            KernelError::IntegrityViolation { .. } => "IntegrityViolation",
            KernelError::ReplicationConflict { .. } => "ReplicationConflict",
            KernelError::PeerUnreachable { .. } => "PeerUnreachable",
            KernelError::Resolution { .. } => "ResolutionError",
            KernelError::Rejected { .. } => "RejectedError",
            KernelError::ApprovalRequired { .. } => "ApprovalRequired",
            KernelError::WriteConflict { .. } => "WriteConflict",
            KernelError::Storage { .. } => "StorageError",
            KernelError::Config { .. } => "ConfigError",
        }
    }

    pub fn projection(event_id: impl ToString, reason: impl Into<String>) -> Self {
        KernelError::Projection {
            event_id: event_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        KernelError::Storage { reason: reason.into() }
    }
}

/// Convenience alias used throughout the Sovereign crates.
pub type KernelResult<T> = Result<T, KernelError>;
