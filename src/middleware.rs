// src/middleware.rs
use std::marker::PhantomData;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use ethers::signers::Signer;
use ethers::types::{Address, Bytes, H256, U256};
use tracing::debug;

use crate::error::{Result, UserOpError};
use crate::types::{KernelMode, UserOperation};

/// In-progress operation plus what a stage needs to hash it. Lives for a single
/// pipeline run.
///
/// Stages get no provider or bundler handle: everything read from the chain
/// (fees, nonce) is fixed before the pipeline starts, and a stage that needs
/// network access carries its own client, as [`UserOperationSigner`] does.
pub struct MiddlewareContext<'a> {
    pub op: &'a mut UserOperation,
    pub entry_point: Address,
    pub chain_id: u64,
}

impl MiddlewareContext<'_> {
    pub fn user_op_hash(&self) -> H256 {
        self.op.hash(self.entry_point, self.chain_id)
    }
}

/// One transform step over the in-progress operation.
#[async_trait]
pub trait OperationMiddleware: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, ctx: &mut MiddlewareContext<'_>) -> anyhow::Result<()>;
}

/// Marker for stages that change signed content and therefore must run
/// before the signature is taken.
pub trait PreSignStage: OperationMiddleware {}

/// Produces the raw signature over a user-operation hash. Local keys and
/// remote signers both fit behind this.
#[async_trait]
pub trait UserOperationSigner: Send + Sync {
    async fn sign_user_op_hash(&self, hash: H256) -> anyhow::Result<Bytes>;
}

#[async_trait]
impl<S> UserOperationSigner for S
where
    S: Signer,
    S::Error: 'static,
{
    async fn sign_user_op_hash(&self, hash: H256) -> anyhow::Result<Bytes> {
        let signature = self.sign_message(hash.as_bytes()).await?;
        Ok(Bytes::from(signature.to_vec()))
    }
}

/// Multiplies the placeholder call gas limit by a fixed factor.
pub struct GasLimitInflation {
    factor: u64,
}

impl GasLimitInflation {
    /// A zero factor would sign an operation that cannot execute.
    pub fn new(factor: u64) -> Result<Self> {
        if factor == 0 {
            return Err(UserOpError::InvalidPipeline(
                "gas inflation factor must be non-zero".to_string(),
            ));
        }
        Ok(Self { factor })
    }

    pub fn factor(&self) -> u64 {
        self.factor
    }
}

#[async_trait]
impl OperationMiddleware for GasLimitInflation {
    fn name(&self) -> &'static str {
        "gas-limit-inflation"
    }

    async fn apply(&self, ctx: &mut MiddlewareContext<'_>) -> anyhow::Result<()> {
        let inflated = ctx
            .op
            .call_gas_limit
            .checked_mul(U256::from(self.factor))
            .ok_or_else(|| anyhow!("call gas limit overflows when multiplied by {}", self.factor))?;

        debug!(from = %ctx.op.call_gas_limit, to = %inflated, "Inflated call gas limit");
        ctx.op.call_gas_limit = inflated;
        Ok(())
    }
}

impl PreSignStage for GasLimitInflation {}

pub struct SignatureMiddleware<S> {
    signer: S,
}

impl<S: UserOperationSigner> SignatureMiddleware<S> {
    pub fn new(signer: S) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl<S: UserOperationSigner> OperationMiddleware for SignatureMiddleware<S> {
    fn name(&self) -> &'static str {
        "signature"
    }

    async fn apply(&self, ctx: &mut MiddlewareContext<'_>) -> anyhow::Result<()> {
        let hash = ctx.user_op_hash();
        ctx.op.signature = self.signer.sign_user_op_hash(hash).await?;
        debug!(user_op_hash = ?hash, "Signed user operation");
        Ok(())
    }
}

/// Prefixes the signature with the Kernel validation mode.
pub struct ModeTagMiddleware {
    mode: KernelMode,
}

impl ModeTagMiddleware {
    pub fn new(mode: KernelMode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl OperationMiddleware for ModeTagMiddleware {
    fn name(&self) -> &'static str {
        "mode-tag"
    }

    async fn apply(&self, ctx: &mut MiddlewareContext<'_>) -> anyhow::Result<()> {
        if ctx.op.signature.is_empty() {
            bail!("no signature to tag");
        }

        let mut framed = Vec::with_capacity(KernelMode::TAG_LEN + ctx.op.signature.len());
        framed.extend_from_slice(&self.mode.tag());
        framed.extend_from_slice(&ctx.op.signature);
        ctx.op.signature = framed.into();
        Ok(())
    }
}

/// Builder phase: content stages may still be added.
pub struct Unsigned;
/// Builder phase: signature stage registered, only framing may follow.
pub struct Signed;
/// Builder phase: pipeline complete.
pub struct Framed;

/// Assembles a [`Pipeline`] in the only valid order: content stages, then the
/// signature, then the mode tag. Each phase only exposes the steps allowed
/// after it.
pub struct PipelineBuilder<P> {
    stages: Vec<Box<dyn OperationMiddleware>>,
    gas_inflation_factor: Option<u64>,
    _phase: PhantomData<P>,
}

impl Default for PipelineBuilder<Unsigned> {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder<Unsigned> {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            gas_inflation_factor: None,
            _phase: PhantomData,
        }
    }

    /// Adds the call-gas inflation stage and records its factor on the
    /// resulting pipeline.
    pub fn inflate_call_gas(mut self, factor: u64) -> Result<Self> {
        let stage = GasLimitInflation::new(factor)?;
        self.gas_inflation_factor = Some(stage.factor());
        Ok(self.with_stage(stage))
    }

    pub fn with_stage<T: PreSignStage + 'static>(mut self, stage: T) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn sign_with<S: UserOperationSigner + 'static>(self, signer: S) -> PipelineBuilder<Signed> {
        self.advance(SignatureMiddleware::new(signer))
    }
}

impl PipelineBuilder<Signed> {
    pub fn frame(self, mode: KernelMode) -> PipelineBuilder<Framed> {
        self.advance(ModeTagMiddleware::new(mode))
    }

    pub fn build(self) -> Pipeline {
        self.finish()
    }
}

impl PipelineBuilder<Framed> {
    pub fn build(self) -> Pipeline {
        self.finish()
    }
}

impl<P> PipelineBuilder<P> {
    fn advance<N, T: OperationMiddleware + 'static>(mut self, stage: T) -> PipelineBuilder<N> {
        self.stages.push(Box::new(stage));
        PipelineBuilder {
            stages: self.stages,
            gas_inflation_factor: self.gas_inflation_factor,
            _phase: PhantomData,
        }
    }

    fn finish(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
            gas_inflation_factor: self.gas_inflation_factor,
        }
    }
}

/// Ordered stages applied one after another to a single operation.
pub struct Pipeline {
    stages: Vec<Box<dyn OperationMiddleware>>,
    gas_inflation_factor: Option<u64>,
}

impl Pipeline {
    /// Inflate, sign, tag.
    pub fn standard<S: UserOperationSigner + 'static>(
        gas_inflation_factor: u64,
        signer: S,
        mode: KernelMode,
    ) -> Result<Self> {
        Ok(PipelineBuilder::new()
            .inflate_call_gas(gas_inflation_factor)?
            .sign_with(signer)
            .frame(mode)
            .build())
    }

    /// Factor of the stage added through [`PipelineBuilder::inflate_call_gas`].
    pub fn gas_inflation_factor(&self) -> Option<u64> {
        self.gas_inflation_factor
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Runs every stage in registration order. The first failing stage aborts
    /// the run.
    pub async fn run(
        &self,
        mut op: UserOperation,
        entry_point: Address,
        chain_id: u64,
    ) -> Result<UserOperation> {
        let mut ctx = MiddlewareContext {
            op: &mut op,
            entry_point,
            chain_id,
        };

        for stage in &self.stages {
            stage
                .apply(&mut ctx)
                .await
                .map_err(|e| UserOpError::MiddlewareStageFailed {
                    stage: stage.name(),
                    reason: format!("{e:#}"),
                })?;
            debug!(stage = stage.name(), "Applied middleware stage");
        }

        Ok(op)
    }
}
