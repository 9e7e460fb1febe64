// src/account.rs
use ethers::abi::{Abi, Token};
use ethers::types::{Address, Bytes, U256};
use tracing::info;

use crate::builder::{encode_function_call, OperationBuilder};
use crate::client::{SubmissionClient, SubmissionHandle};
use crate::config::PipelineConfig;
use crate::error::{Result, UserOpError};
use crate::fees::{FeeOracle, FeeSource};
use crate::middleware::Pipeline;
use crate::nonce::NonceSource;
use crate::rpc::BundlerApiClient;
use crate::types::UserOperation;

/// Builds, signs and relays operations for one Kernel account.
///
/// Builds are not serialized: two concurrent calls for the same account read
/// the same nonce and one of them will be rejected or dropped. Keep at most
/// one build-and-submit in flight per account.
pub struct KernelClient<F, N, C> {
    sender: Address,
    chain_id: u64,
    fee_oracle: FeeOracle<F>,
    nonce_source: N,
    builder: OperationBuilder,
    pipeline: Pipeline,
    submitter: SubmissionClient<C>,
}

impl<F, N, C> KernelClient<F, N, C>
where
    F: FeeSource,
    N: NonceSource,
    C: BundlerApiClient + Send + Sync,
{
    /// `pipeline` must inflate call gas by `config.gas_inflation_factor`;
    /// build it with [`Pipeline::standard`] or
    /// [`PipelineBuilder::inflate_call_gas`](crate::PipelineBuilder::inflate_call_gas).
    pub fn new(
        sender: Address,
        chain_id: u64,
        config: PipelineConfig,
        fee_source: F,
        nonce_source: N,
        pipeline: Pipeline,
        submitter: SubmissionClient<C>,
    ) -> Result<Self> {
        config.validate()?;
        if pipeline.gas_inflation_factor() != Some(config.gas_inflation_factor) {
            return Err(UserOpError::InvalidPipeline(format!(
                "pipeline inflates call gas by {:?}, config expects {}",
                pipeline.gas_inflation_factor(),
                config.gas_inflation_factor
            )));
        }

        Ok(Self {
            sender,
            chain_id,
            fee_oracle: FeeOracle::new(fee_source, config.fee_headroom_bps),
            nonce_source,
            builder: OperationBuilder::new(config),
            pipeline,
            submitter,
        })
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    /// Fee and nonce are fetched concurrently, then the operation is built and
    /// run through the pipeline. Nothing is sent.
    pub async fn prepare(&self, call_data: Bytes, nonce_key: U256) -> Result<UserOperation> {
        let (fees, nonce) = tokio::try_join!(
            self.fee_oracle.estimate(),
            self.nonce_source.next_nonce(self.sender, nonce_key)
        )?;

        let op = self
            .builder
            .build_with_call_data(self.sender, call_data, &fees, nonce)?;

        self.pipeline
            .run(op, self.submitter.entry_point(), self.chain_id)
            .await
    }

    pub async fn prepare_call(
        &self,
        abi: &Abi,
        function: &str,
        args: &[Token],
        nonce_key: U256,
    ) -> Result<UserOperation> {
        let call_data = encode_function_call(abi, function, args)?;
        self.prepare(call_data, nonce_key).await
    }

    /// Prepares and relays. A build failure means nothing was sent.
    pub async fn send(&self, call_data: Bytes, nonce_key: U256) -> Result<SubmissionHandle<C>> {
        let op = self.prepare(call_data, nonce_key).await?;
        info!(sender = %self.sender, nonce = %op.nonce, "Submitting user operation");
        self.submitter.submit(op).await
    }

    pub async fn send_call(
        &self,
        abi: &Abi,
        function: &str,
        args: &[Token],
        nonce_key: U256,
    ) -> Result<SubmissionHandle<C>> {
        let call_data = encode_function_call(abi, function, args)?;
        self.send(call_data, nonce_key).await
    }

    pub fn submitter(&self) -> &SubmissionClient<C> {
        &self.submitter
    }

    pub fn config(&self) -> &PipelineConfig {
        self.builder.config()
    }
}
