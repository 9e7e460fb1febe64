// src/types.rs
use std::fmt;
use std::str::FromStr;

use ethers::abi::{self, Token};
use ethers::types::{Address, Bytes, H256, U256, U64};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UserOpError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// ABI-encodes every field except the signature, with the dynamic byte
    /// fields replaced by their keccak256 digests.
    pub fn pack_without_signature(&self) -> Bytes {
        abi::encode(&[
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::FixedBytes(keccak256(&self.init_code).to_vec()),
            Token::FixedBytes(keccak256(&self.call_data).to_vec()),
            Token::Uint(self.call_gas_limit),
            Token::Uint(self.verification_gas_limit),
            Token::Uint(self.pre_verification_gas),
            Token::Uint(self.max_fee_per_gas),
            Token::Uint(self.max_priority_fee_per_gas),
            Token::FixedBytes(keccak256(&self.paymaster_and_data).to_vec()),
        ])
        .into()
    }

    /// The hash the entry point hands to the account for validation.
    pub fn hash(&self, entry_point: Address, chain_id: u64) -> H256 {
        let encoded = abi::encode(&[
            Token::FixedBytes(keccak256(self.pack_without_signature()).to_vec()),
            Token::Address(entry_point),
            Token::Uint(U256::from(chain_id)),
        ]);
        H256::from(keccak256(encoded))
    }
}

/// Raw network fee conditions, fetched fresh for every build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub priority_fee: U256,
    /// Absent on networks without EIP-1559.
    pub base_fee: Option<U256>,
}

impl FeeEstimate {
    /// Derives the fee bid: the tip plus `headroom_bps` basis points, and twice
    /// the base fee on top when the network has one.
    pub fn bid(&self, headroom_bps: u32) -> Result<GasFees> {
        let buffer = self
            .priority_fee
            .checked_mul(U256::from(headroom_bps))
            .ok_or(UserOpError::GasOverflow("priority fee headroom"))?
            / U256::from(10_000u64);
        let max_priority_fee_per_gas = self
            .priority_fee
            .checked_add(buffer)
            .ok_or(UserOpError::GasOverflow("max priority fee"))?;

        let max_fee_per_gas = match self.base_fee {
            Some(base_fee) => base_fee
                .checked_mul(U256::from(2u64))
                .and_then(|doubled| doubled.checked_add(max_priority_fee_per_gas))
                .ok_or(UserOpError::GasOverflow("max fee"))?,
            None => max_priority_fee_per_gas,
        };

        Ok(GasFees {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasFees {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Validation mode a Kernel account uses to interpret a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelMode {
    #[default]
    Sudo,
    Plugin,
}

impl KernelMode {
    pub const TAG_LEN: usize = 4;

    pub fn tag(&self) -> [u8; Self::TAG_LEN] {
        match self {
            KernelMode::Sudo => [0, 0, 0, 0],
            KernelMode::Plugin => [0, 0, 0, 1],
        }
    }

    pub fn from_tag(tag: [u8; Self::TAG_LEN]) -> Option<Self> {
        [KernelMode::Sudo, KernelMode::Plugin]
            .into_iter()
            .find(|mode| mode.tag() == tag)
    }
}

impl fmt::Display for KernelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KernelMode::Sudo => "sudo",
            KernelMode::Plugin => "plugin",
        };
        write!(f, "{name}")
    }
}

impl FromStr for KernelMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sudo" => return Ok(KernelMode::Sudo),
            "plugin" => return Ok(KernelMode::Plugin),
            _ => {}
        }

        let raw = hex::decode(s.trim_start_matches("0x")).map_err(|e| e.to_string())?;
        let tag: [u8; Self::TAG_LEN] = raw
            .try_into()
            .map_err(|_| format!("mode tag must be {} bytes", Self::TAG_LEN))?;
        KernelMode::from_tag(tag).ok_or_else(|| format!("unknown mode tag {s}"))
    }
}

/// Transaction that carried a user operation on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionReceipt {
    pub transaction_hash: H256,
    #[serde(default)]
    pub block_hash: Option<H256>,
    #[serde(default)]
    pub block_number: Option<U64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub sender: Address,
    pub nonce: U256,
    pub actual_gas_cost: U256,
    pub actual_gas_used: U256,
    pub success: bool,
    pub receipt: InclusionReceipt,
}

/// Terminal state of waiting on a relayed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InclusionOutcome {
    Included(UserOperationReceipt),
    /// Gave up waiting. The operation may still land; re-read chain state
    /// before resubmitting.
    Unknown,
}

impl InclusionOutcome {
    pub fn transaction_hash(&self) -> Option<H256> {
        match self {
            InclusionOutcome::Included(receipt) => Some(receipt.receipt.transaction_hash),
            InclusionOutcome::Unknown => None,
        }
    }
}
