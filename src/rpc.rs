// src/rpc.rs
use ethers::types::{Address, H256, U64};
use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{UserOperation, UserOperationReceipt};

/// Bundler methods of the ERC-4337 `eth` namespace used by this crate.
#[rpc(client, server, namespace = "eth")]
pub trait BundlerApi {
    #[method(name = "chainId")]
    async fn chain_id(&self) -> RpcResult<U64>;

    #[method(name = "supportedEntryPoints")]
    async fn supported_entry_points(&self) -> RpcResult<Vec<Address>>;

    /// Relays an operation into the bundler's pool and returns its hash.
    #[method(name = "sendUserOperation")]
    async fn send_user_operation(
        &self,
        user_operation: UserOperation,
        entry_point: Address,
    ) -> RpcResult<H256>;

    /// `None` until the operation is included.
    #[method(name = "getUserOperationReceipt")]
    async fn get_user_operation_receipt(
        &self,
        user_operation_hash: H256,
    ) -> RpcResult<Option<UserOperationReceipt>>;
}
