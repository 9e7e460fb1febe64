// src/client.rs
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, H256};
use jsonrpsee::core::Error as RpcError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{Result, UserOpError};
use crate::rpc::BundlerApiClient;
use crate::types::{InclusionOutcome, UserOperation};

/// Floor for the receipt poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Relays finished operations to a bundler. Keeps nothing about an operation
/// once it has been relayed; the returned handle is the only trace.
pub struct SubmissionClient<C> {
    client: Arc<C>,
    entry_point: Address,
}

impl SubmissionClient<HttpClient> {
    pub fn http(bundler_url: &str, entry_point: Address) -> Result<Self> {
        let client = HttpClientBuilder::default()
            .build(bundler_url)
            .map_err(|e| UserOpError::BundlerUnavailable(e.to_string()))?;
        Ok(Self::new(client, entry_point))
    }
}

impl<C: BundlerApiClient + Send + Sync> SubmissionClient<C> {
    pub fn new(client: C, entry_point: Address) -> Self {
        Self {
            client: Arc::new(client),
            entry_point,
        }
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    /// Fails with `UnsupportedEntryPoint` if the bundler does not serve ours.
    /// Nothing is submitted either way.
    pub async fn ensure_supported(&self) -> Result<()> {
        let supported = self
            .client
            .supported_entry_points()
            .await
            .map_err(rejection_or_unavailable)?;

        if supported.contains(&self.entry_point) {
            Ok(())
        } else {
            Err(UserOpError::UnsupportedEntryPoint(self.entry_point))
        }
    }

    /// Hands `op` to the bundler. Returns once the bundler has accepted it
    /// into its pool, not once it is on-chain.
    pub async fn submit(&self, op: UserOperation) -> Result<SubmissionHandle<C>> {
        let sender = op.sender;
        let nonce = op.nonce;

        let user_op_hash = self
            .client
            .send_user_operation(op, self.entry_point)
            .await
            .map_err(rejection_or_unavailable)?;

        info!(%sender, %nonce, ?user_op_hash, "Bundler accepted user operation");
        Ok(SubmissionHandle {
            user_op_hash,
            client: self.client.clone(),
        })
    }
}

/// Bundler errors are passed through word for word; their taxonomy differs
/// between implementations.
fn rejection_or_unavailable(err: RpcError) -> UserOpError {
    match err {
        RpcError::Call(obj) => UserOpError::SubmissionRejected {
            reason: obj.message().to_string(),
        },
        other => UserOpError::BundlerUnavailable(other.to_string()),
    }
}

/// Proof that a bundler pooled an operation. Waiting consumes the handle.
#[must_use = "an accepted operation may still land on-chain"]
pub struct SubmissionHandle<C> {
    user_op_hash: H256,
    client: Arc<C>,
}

impl<C: BundlerApiClient + Send + Sync> SubmissionHandle<C> {
    pub fn user_op_hash(&self) -> H256 {
        self.user_op_hash
    }

    /// Polls the bundler until a receipt shows up or `timeout` passes.
    /// Failed polls are logged and retried; the only terminal states are
    /// `Included` and `Unknown`. Dropping the future stops polling but does
    /// not recall the operation. `interval` is raised to [`MIN_POLL_INTERVAL`].
    pub async fn wait(self, timeout: Duration, interval: Duration) -> InclusionOutcome {
        let deadline = Instant::now() + timeout;
        let interval = interval.max(MIN_POLL_INTERVAL);

        loop {
            match self
                .client
                .get_user_operation_receipt(self.user_op_hash)
                .await
            {
                Ok(Some(receipt)) => {
                    info!(
                        user_op_hash = ?self.user_op_hash,
                        transaction_hash = ?receipt.receipt.transaction_hash,
                        success = receipt.success,
                        "User operation included"
                    );
                    return InclusionOutcome::Included(receipt);
                }
                Ok(None) => debug!(user_op_hash = ?self.user_op_hash, "Not yet included"),
                Err(e) => warn!(user_op_hash = ?self.user_op_hash, "Receipt query failed: {}", e),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(interval.min(deadline - now)).await;
        }

        warn!(user_op_hash = ?self.user_op_hash, ?timeout, "Gave up waiting for inclusion");
        InclusionOutcome::Unknown
    }
}
