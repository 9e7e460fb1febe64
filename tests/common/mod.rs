#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers::types::{Address, H256, U256, U64};
use jsonrpsee::core::RpcResult;
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use jsonrpsee::types::ErrorObject;
use kernel_userop::error::Result;
use kernel_userop::rpc::BundlerApiServer;
use kernel_userop::types::{InclusionReceipt, UserOperation, UserOperationReceipt};
use kernel_userop::{FeeSource, NonceSource};

pub const CHAIN_ID: u64 = 31337;

// anvil account 0
pub const OWNER_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub fn entry_point() -> Address {
    kernel_userop::ENTRY_POINT_V06.parse().unwrap()
}

#[derive(Default)]
pub struct BundlerState {
    pub min_max_fee: U256,
    /// Receipt polls answered with `null` before the receipt shows up.
    /// `usize::MAX` never includes.
    pub pending_polls: usize,
    pub polls: AtomicUsize,
    pub pooled: Mutex<Vec<UserOperation>>,
}

pub struct MockBundler {
    pub state: Arc<BundlerState>,
}

#[async_trait]
impl BundlerApiServer for MockBundler {
    async fn chain_id(&self) -> RpcResult<U64> {
        Ok(U64::from(CHAIN_ID))
    }

    async fn supported_entry_points(&self) -> RpcResult<Vec<Address>> {
        Ok(vec![entry_point()])
    }

    async fn send_user_operation(
        &self,
        user_operation: UserOperation,
        entry_point: Address,
    ) -> RpcResult<H256> {
        if user_operation.max_fee_per_gas < self.state.min_max_fee {
            return Err(ErrorObject::owned(
                -32602,
                "insufficient max fee",
                None::<()>,
            ));
        }

        let hash = user_operation.hash(entry_point, CHAIN_ID);
        self.state.pooled.lock().unwrap().push(user_operation);
        Ok(hash)
    }

    async fn get_user_operation_receipt(
        &self,
        user_operation_hash: H256,
    ) -> RpcResult<Option<UserOperationReceipt>> {
        let polls = self.state.polls.fetch_add(1, Ordering::SeqCst);
        if polls < self.state.pending_polls {
            return Ok(None);
        }

        let pooled = self.state.pooled.lock().unwrap();
        let receipt = pooled
            .iter()
            .find(|op| op.hash(entry_point(), CHAIN_ID) == user_operation_hash)
            .map(|op| UserOperationReceipt {
                user_op_hash: user_operation_hash,
                sender: op.sender,
                nonce: op.nonce,
                actual_gas_cost: U256::from(1_000_000u64),
                actual_gas_used: U256::from(90_000u64),
                success: true,
                receipt: InclusionReceipt {
                    transaction_hash: H256::repeat_byte(0x77),
                    block_hash: Some(H256::repeat_byte(0x88)),
                    block_number: Some(U64::from(100)),
                },
            });
        Ok(receipt)
    }
}

pub async fn start_bundler(state: Arc<BundlerState>) -> anyhow::Result<(String, ServerHandle)> {
    let server = ServerBuilder::default().build("127.0.0.1:0").await?;
    let addr = server.local_addr()?;
    let handle = server.start(MockBundler { state }.into_rpc());
    Ok((format!("http://{addr}"), handle))
}

pub struct StaticFees {
    pub tip: U256,
    pub base_fee: Option<U256>,
}

#[async_trait]
impl FeeSource for StaticFees {
    async fn suggested_priority_fee(&self) -> Result<U256> {
        Ok(self.tip)
    }

    async fn latest_base_fee(&self) -> Result<Option<U256>> {
        Ok(self.base_fee)
    }
}

/// Entry point stand-in that never advances on its own.
pub struct FixedNonce {
    pub nonce: U256,
    pub reads: AtomicUsize,
}

#[async_trait]
impl NonceSource for FixedNonce {
    async fn next_nonce(&self, _account: Address, _key: U256) -> Result<U256> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.nonce)
    }
}
