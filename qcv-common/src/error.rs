//! Common error types for the QC review core

use thiserror::Error;

/// Common result type for review operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the review core and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    /// Metric value shape could not be classified; callers recover by
    /// degrading the value to the opaque variant
    #[error("Classification error: {0}")]
    Classification(String),

    /// A change was submitted against a metric or column that does not
    /// exist in the loaded document
    #[error("Invalid change target: {0}")]
    InvalidChangeTarget(String),

    /// A custom-value status derivation could not find the selected option;
    /// callers recover by forcing the status to Pending
    #[error("Lookup failure: {0}")]
    Lookup(String),

    /// Read-only or guest session attempted to commit
    #[error("Unauthorized: commit requires a logged-in session")]
    Unauthorized,

    /// A commit was requested while another commit is still in flight
    #[error("Commit already in progress")]
    CommitInProgress,

    /// The backing store rejected the document write
    #[error("Submit failed{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Submit {
        status: Option<u16>,
        message: String,
    },

    /// HTTP transport error (wraps reqwest::Error)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),
}
