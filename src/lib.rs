// src/lib.rs
//! Construction and submission of Kernel user operations: fee bid, entry-point
//! nonce, call-data encoding, an ordered signing pipeline and a bundler client
//! with two-phase submit / wait.

pub mod account;
pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod fees;
pub mod middleware;
pub mod nonce;
pub mod rpc;
pub mod types;

pub use account::KernelClient;
pub use builder::{encode_kernel_execute, CallOperation, OperationBuilder};
pub use client::{SubmissionClient, SubmissionHandle};
pub use config::PipelineConfig;
pub use error::UserOpError;
pub use fees::{FeeOracle, FeeSource, ProviderFeeSource};
pub use middleware::{Pipeline, PipelineBuilder, UserOperationSigner};
pub use nonce::{EntryPointNonceSource, NonceSource, ENTRY_POINT_V06};
pub use types::{FeeEstimate, GasFees, InclusionOutcome, KernelMode, UserOperation};
