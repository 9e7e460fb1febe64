// src/builder.rs
use ethers::abi::token::{LenientTokenizer, Tokenizer};
use ethers::abi::{Abi, AbiEncode, Function, Token};
use ethers::prelude::*;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{Result, UserOpError};
use crate::types::{FeeEstimate, UserOperation};

abigen!(
    KernelAccount,
    r#"[
        function execute(address to, uint256 value, bytes data, uint8 operation) external payable
    ]"#
);

/// How a Kernel account performs an `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CallOperation {
    Call = 0,
    DelegateCall = 1,
}

/// Selector plus ABI-encoded arguments of `function` in `abi`. Argument types
/// are checked against the function's inputs before encoding.
pub fn encode_function_call(abi: &Abi, function: &str, args: &[Token]) -> Result<Bytes> {
    let function = abi
        .function(function)
        .map_err(|e| UserOpError::InvalidCall(format!("{function}: {e}")))?;

    function
        .encode_input(args)
        .map(Bytes::from)
        .map_err(|e| UserOpError::InvalidCall(format!("{}: {e}", function.name)))
}

/// Parses textual arguments against the parameter types of `function`.
pub fn tokenize_args<S: AsRef<str>>(function: &Function, args: &[S]) -> Result<Vec<Token>> {
    if function.inputs.len() != args.len() {
        return Err(UserOpError::InvalidCall(format!(
            "{} expects {} arguments, got {}",
            function.name,
            function.inputs.len(),
            args.len()
        )));
    }

    function
        .inputs
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            LenientTokenizer::tokenize(&param.kind, arg.as_ref()).map_err(|e| {
                UserOpError::InvalidCall(format!("argument '{}': {e}", param.name))
            })
        })
        .collect()
}

/// Call data routing `data` through the account's own `execute` entry.
pub fn encode_kernel_execute(
    to: Address,
    value: U256,
    data: Bytes,
    operation: CallOperation,
) -> Bytes {
    ExecuteCall {
        to,
        value,
        data,
        operation: operation as u8,
    }
    .encode()
    .into()
}

pub struct OperationBuilder {
    config: PipelineConfig,
}

impl OperationBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Builds the unsigned operation calling `function` on the account.
    pub fn build(
        &self,
        sender: Address,
        abi: &Abi,
        function: &str,
        args: &[Token],
        fees: &FeeEstimate,
        nonce: U256,
    ) -> Result<UserOperation> {
        let call_data = encode_function_call(abi, function, args)?;
        self.build_with_call_data(sender, call_data, fees, nonce)
    }

    /// Same as [`build`](Self::build) for call data that is already encoded.
    /// Performs no gas estimation: `call_gas_limit` is the configured
    /// placeholder and the signature is left empty.
    pub fn build_with_call_data(
        &self,
        sender: Address,
        call_data: Bytes,
        fees: &FeeEstimate,
        nonce: U256,
    ) -> Result<UserOperation> {
        let fees = fees.bid(self.config.fee_headroom_bps)?;

        let op = UserOperation {
            sender,
            nonce,
            init_code: Bytes::default(),
            call_data,
            call_gas_limit: U256::from(self.config.call_gas_limit),
            verification_gas_limit: U256::from(self.config.verification_gas_limit),
            pre_verification_gas: U256::from(self.config.pre_verification_gas),
            max_fee_per_gas: fees.max_fee_per_gas,
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas,
            paymaster_and_data: Bytes::default(),
            signature: Bytes::default(),
        };

        debug!(
            %sender,
            %nonce,
            max_fee_per_gas = %op.max_fee_per_gas,
            max_priority_fee_per_gas = %op.max_priority_fee_per_gas,
            "Built user operation"
        );
        Ok(op)
    }
}
