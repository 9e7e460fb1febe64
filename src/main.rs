// src/main.rs
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use ethers::abi::Abi;
use ethers::prelude::*;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use kernel_userop::builder::{encode_function_call, tokenize_args};
use kernel_userop::{
    encode_kernel_execute, CallOperation, EntryPointNonceSource, InclusionOutcome, KernelClient,
    KernelMode, Pipeline, PipelineConfig, ProviderFeeSource, SubmissionClient, ENTRY_POINT_V06,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(long, env = "ETH_RPC_URL")]
    eth_rpc_url: String,

    /// Defaults to the node URL
    #[clap(long, env = "BUNDLER_URL")]
    bundler_url: Option<String>,

    #[clap(long, env = "PRIVATE_KEY")]
    private_key: String,

    /// Queried from the node when omitted
    #[clap(long, env = "CHAIN_ID")]
    chain_id: Option<u64>,

    #[clap(long, env = "ENTRY_POINT", default_value = ENTRY_POINT_V06)]
    entry_point: Address,

    /// Kernel account the operation is sent from
    #[clap(long, env = "KERNEL_ADDRESS")]
    sender: Address,

    /// Nonce sequence key, hex
    #[clap(long, default_value = "0")]
    nonce_key: U256,

    /// sudo, plugin or their raw 4-byte tag
    #[clap(long, default_value = "plugin")]
    mode: KernelMode,

    /// JSON ABI of the called contract
    #[clap(long)]
    abi: PathBuf,

    #[clap(long)]
    function: String,

    #[clap(long = "arg")]
    args: Vec<String>,

    /// Route the call through the account's `execute` to this contract
    #[clap(long)]
    target: Option<Address>,

    /// JSON pipeline config overriding the defaults
    #[clap(long)]
    config: Option<PathBuf>,

    #[clap(long)]
    no_wait: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };

    let provider = Arc::new(Provider::<Http>::try_from(args.eth_rpc_url.as_str())?);
    let chain_id = match args.chain_id {
        Some(chain_id) => chain_id,
        None => provider.get_chainid().await?.as_u64(),
    };
    let wallet = args.private_key.parse::<LocalWallet>()?.with_chain_id(chain_id);
    info!("Signing for {} with owner {}", args.sender, wallet.address());

    let abi: Abi = serde_json::from_str(
        &std::fs::read_to_string(&args.abi)
            .with_context(|| format!("reading ABI {}", args.abi.display()))?,
    )?;
    let function = abi.function(&args.function)?;
    let tokens = tokenize_args(function, &args.args)?;
    let mut call_data = encode_function_call(&abi, &args.function, &tokens)?;
    if let Some(target) = args.target {
        call_data = encode_kernel_execute(target, U256::zero(), call_data, CallOperation::Call);
    }

    let bundler_url = args.bundler_url.as_deref().unwrap_or(&args.eth_rpc_url);
    let submitter = SubmissionClient::http(bundler_url, args.entry_point)?;
    if let Err(e) = submitter.ensure_supported().await {
        warn!("Entry point check failed: {}", e);
    }

    let pipeline = Pipeline::standard(config.gas_inflation_factor, wallet, args.mode)?;
    let (wait_timeout, wait_interval) = (config.wait_timeout(), config.wait_interval());
    let client = KernelClient::new(
        args.sender,
        chain_id,
        config,
        ProviderFeeSource::new(provider.clone()),
        EntryPointNonceSource::new(args.entry_point, provider),
        pipeline,
        submitter,
    )?;

    let handle = client.send(call_data, args.nonce_key).await?;
    info!("UserOpHash: {:?}", handle.user_op_hash());

    if args.no_wait {
        return Ok(());
    }

    match handle.wait(wait_timeout, wait_interval).await {
        InclusionOutcome::Included(receipt) => {
            info!(
                "Transaction hash: {:?} (success: {})",
                receipt.receipt.transaction_hash, receipt.success
            );
        }
        InclusionOutcome::Unknown => {
            warn!("Inclusion unknown; check the account nonce before resubmitting");
        }
    }

    Ok(())
}
