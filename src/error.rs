//! Error types for configuration reconciliation

use thiserror::Error;

/// Errors that can occur during a reconciliation cycle
#[derive(Error, Debug)]
pub enum Error {
    /// Network/protocol failure talking to the device. Never retried by the
    /// core; propagated immediately.
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// The device rejected the submitted configuration. Triggers the single
    /// reset-and-retry cycle in the reconciliation controller.
    #[error("device rejected configuration import{}", job.as_deref().map(|j| format!(" (job {j})")).unwrap_or_default())]
    ConfigRejected { job: Option<String> },

    /// A second import attempt was rejected after the reset/recovery cycle.
    #[error("configuration import rejected after reset and retry")]
    ImportRejectedAfterRetry,

    /// Intent requires enabling a feature the device does not have.
    #[error("need to set {attribute} to {value}, but that attribute does not exist on the server")]
    CapabilityMismatch { attribute: String, value: String },

    /// A bounded wait was exhausted.
    #[error("timed out waiting for {waiting_for}")]
    Timeout { waiting_for: String },

    /// The device did not create a job for an export/import invocation.
    #[error("no job created for {action}")]
    JobNotCreated { action: String },

    /// Malformed configuration document.
    #[error("configuration document parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    /// IO error reading or writing a configuration snapshot
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a collaborator failure as a transport error.
    pub fn transport(err: impl Into<anyhow::Error>) -> Self {
        Self::Transport(err.into())
    }

    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }
}

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;
