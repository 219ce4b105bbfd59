use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExitError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Transport-level failure for a single piece. Never fatal to an exit.
    #[error("transfer failed (code {0})")]
    TransferFailure(i32),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Format error: {0}")]
    Format(String),

    #[error("config error: {0}")]
    Config(String),
}

impl ExitError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExitError::NotFound(_))
    }

    /// Persistence-level errors. These abort a scheduling pass and must never
    /// be charged against a piece's failure count.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            ExitError::StoreUnavailable(_) | ExitError::Io(_) | ExitError::Format(_)
        )
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, ExitError>;
