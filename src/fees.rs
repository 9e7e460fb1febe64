// src/fees.rs
use std::sync::Arc;

use async_trait::async_trait;
use ethers::prelude::*;
use tracing::debug;

use crate::error::{Result, UserOpError};
use crate::types::{FeeEstimate, GasFees};

/// Read side of the fee market.
#[async_trait]
pub trait FeeSource: Send + Sync {
    /// Tip suggested by `eth_maxPriorityFeePerGas`.
    async fn suggested_priority_fee(&self) -> Result<U256>;

    /// Base fee of the latest block, `None` when the network has none.
    async fn latest_base_fee(&self) -> Result<Option<U256>>;
}

/// `FeeSource` backed by any ethers middleware stack.
pub struct ProviderFeeSource<M> {
    client: Arc<M>,
}

impl<M> ProviderFeeSource<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<M: Middleware + 'static> FeeSource for ProviderFeeSource<M> {
    async fn suggested_priority_fee(&self) -> Result<U256> {
        self.client
            .provider()
            .request::<_, U256>("eth_maxPriorityFeePerGas", ())
            .await
            .map_err(|e| UserOpError::FeeQueryFailed(e.to_string()))
    }

    async fn latest_base_fee(&self) -> Result<Option<U256>> {
        let block = self
            .client
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| UserOpError::FeeQueryFailed(e.to_string()))?
            .ok_or_else(|| UserOpError::FeeQueryFailed("latest block not found".to_string()))?;

        Ok(block.base_fee_per_gas)
    }
}

pub struct FeeOracle<S> {
    source: S,
    headroom_bps: u32,
}

impl<S: FeeSource> FeeOracle<S> {
    pub fn new(source: S, headroom_bps: u32) -> Self {
        Self {
            source,
            headroom_bps,
        }
    }

    /// Fetches the tip and the base fee concurrently. Either failure fails the
    /// estimate; nothing is retried here.
    pub async fn estimate(&self) -> Result<FeeEstimate> {
        let (priority_fee, base_fee) = tokio::try_join!(
            self.source.suggested_priority_fee(),
            self.source.latest_base_fee()
        )?;

        debug!(%priority_fee, ?base_fee, "Fetched fee conditions");

        Ok(FeeEstimate {
            priority_fee,
            base_fee,
        })
    }

    pub async fn bid(&self) -> Result<GasFees> {
        self.estimate().await?.bid(self.headroom_bps)
    }

    pub fn headroom_bps(&self) -> u32 {
        self.headroom_bps
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ethers::providers::MockProvider;

    use super::*;

    struct StaticFees {
        tip: U256,
        base_fee: Option<U256>,
        fail_block: bool,
        calls: AtomicUsize,
    }

    impl StaticFees {
        fn new(tip: u64, base_fee: Option<u64>) -> Self {
            Self {
                tip: U256::from(tip),
                base_fee: base_fee.map(U256::from),
                fail_block: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FeeSource for StaticFees {
        async fn suggested_priority_fee(&self) -> Result<U256> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.tip)
        }

        async fn latest_base_fee(&self) -> Result<Option<U256>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_block {
                return Err(UserOpError::FeeQueryFailed("connection refused".to_string()));
            }
            Ok(self.base_fee)
        }
    }

    #[tokio::test]
    async fn bid_for_one_gwei_tip_and_ten_gwei_base() {
        let oracle = FeeOracle::new(StaticFees::new(1_000_000_000, Some(10_000_000_000)), 1_300);
        let fees = oracle.bid().await.unwrap();
        assert_eq!(fees.max_priority_fee_per_gas, U256::from(1_130_000_000u64));
        assert_eq!(fees.max_fee_per_gas, U256::from(21_130_000_000u64));
    }

    #[tokio::test]
    async fn legacy_network_uses_priority_fee_as_max_fee() {
        let oracle = FeeOracle::new(StaticFees::new(2_000_000_000, None), 1_300);
        let estimate = oracle.estimate().await.unwrap();
        assert_eq!(estimate.base_fee, None);
        let fees = estimate.bid(oracle.headroom_bps()).unwrap();
        assert_eq!(fees.max_fee_per_gas, U256::from(2_260_000_000u64));
        assert_eq!(fees.max_fee_per_gas, fees.max_priority_fee_per_gas);
    }

    #[tokio::test]
    async fn block_failure_surfaces_as_fee_query_failed() {
        let mut source = StaticFees::new(1, Some(1));
        source.fail_block = true;
        let oracle = FeeOracle::new(source, 1_300);
        let err = oracle.estimate().await.unwrap_err();
        assert!(matches!(err, UserOpError::FeeQueryFailed(ref msg) if msg == "connection refused"));
        assert!(err.is_build_failure());
    }

    fn mocked_source() -> (ProviderFeeSource<Provider<MockProvider>>, MockProvider) {
        let (provider, mock) = Provider::mocked();
        (ProviderFeeSource::new(Arc::new(provider)), mock)
    }

    #[tokio::test]
    async fn provider_tip_is_decoded_from_hex() {
        let (source, mock) = mocked_source();
        mock.push::<U256, _>(U256::from(1_000_000_000u64)).unwrap();

        let tip = source.suggested_priority_fee().await.unwrap();
        assert_eq!(tip, U256::from(1_000_000_000u64));
    }

    #[tokio::test]
    async fn eip1559_block_yields_base_fee() {
        let (source, mock) = mocked_source();
        let block = Block::<H256> {
            number: Some(U64::from(100)),
            base_fee_per_gas: Some(U256::from(10_000_000_000u64)),
            ..Default::default()
        };
        mock.push::<Block<H256>, _>(block).unwrap();

        let base_fee = source.latest_base_fee().await.unwrap();
        assert_eq!(base_fee, Some(U256::from(10_000_000_000u64)));
    }

    #[tokio::test]
    async fn legacy_block_has_no_base_fee() {
        let (source, mock) = mocked_source();
        let block = Block::<H256> {
            number: Some(U64::from(100)),
            ..Default::default()
        };
        mock.push::<Block<H256>, _>(block).unwrap();

        assert_eq!(source.latest_base_fee().await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_latest_block_is_fee_query_failed() {
        let (source, mock) = mocked_source();
        mock.push::<Option<Block<H256>>, _>(None).unwrap();

        let err = source.latest_base_fee().await.unwrap_err();
        assert!(matches!(err, UserOpError::FeeQueryFailed(ref msg) if msg == "latest block not found"));
    }

    #[tokio::test]
    async fn provider_error_is_fee_query_failed() {
        let (source, _mock) = mocked_source();
        let err = source.suggested_priority_fee().await.unwrap_err();
        assert!(matches!(err, UserOpError::FeeQueryFailed(_)));
    }

    #[tokio::test]
    async fn both_queries_are_issued() {
        let oracle = FeeOracle::new(StaticFees::new(5, Some(7)), 1_300);
        oracle.estimate().await.unwrap();
        assert_eq!(oracle.source.calls.load(Ordering::SeqCst), 2);
    }
}
