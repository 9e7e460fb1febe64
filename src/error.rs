// src/error.rs
use ethers::types::Address;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UserOpError {
    #[error("Fee query failed: {0}")]
    FeeQueryFailed(String),

    #[error("Nonce query failed: {0}")]
    NonceQueryFailed(String),

    #[error("Invalid call: {0}")]
    InvalidCall(String),

    #[error("Gas overflow while computing {0}")]
    GasOverflow(&'static str),

    #[error("Middleware stage '{stage}' failed: {reason}")]
    MiddlewareStageFailed { stage: &'static str, reason: String },

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Entry point {0:?} not supported by the bundler")]
    UnsupportedEntryPoint(Address),

    #[error("Submission rejected by bundler: {reason}")]
    SubmissionRejected { reason: String },

    #[error("Bundler unavailable: {0}")]
    BundlerUnavailable(String),
}

impl UserOpError {
    /// Nothing reached the bundler; retrying with a fresh nonce and fee is safe.
    pub fn is_build_failure(&self) -> bool {
        matches!(
            self,
            UserOpError::FeeQueryFailed(_)
                | UserOpError::NonceQueryFailed(_)
                | UserOpError::InvalidCall(_)
                | UserOpError::GasOverflow(_)
                | UserOpError::MiddlewareStageFailed { .. }
                | UserOpError::InvalidPipeline(_)
                | UserOpError::UnsupportedEntryPoint(_)
        )
    }

    /// The bundler saw the operation and refused it.
    pub fn is_submission_rejection(&self) -> bool {
        matches!(self, UserOpError::SubmissionRejected { .. })
    }
}

pub type Result<T, E = UserOpError> = std::result::Result<T, E>;
