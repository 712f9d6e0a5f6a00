use std::fs;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use lnsync_chain::chain_client_from_url;
use lnsync_core::funding::FundingTxCache;
use lnsync_core::store::KvGraphStore;
use lnsync_core::sync::GraphSync;
use lnsync_core::util::clock::StandardClock;
use lnsync_persist::{JsonFileCache, RedbKvStore};
#[allow(unused_imports)]
use log::{error, info};
use triggered::Listener;

use crate::cln::ClnRestSource;
use crate::config::SyncArgs;

/// Directory of the graph store, under the network directory
pub const GRAPH_DIR: &str = "graph";

/// Wire up the chain client, stores and graph source, then sync until
/// `shutdown` fires
pub async fn run(args: &SyncArgs, shutdown: Listener) -> anyhow::Result<()> {
    let network_dir = args.network_dir();
    fs::create_dir_all(&network_dir)
        .with_context(|| format!("create data directory {}", network_dir.display()))?;

    let chain_url = args.chain_url().map_err(|e| anyhow!(e))?;
    info!("using {} chain backend at {}", args.chain_backend, chain_url.host_str().unwrap_or(""));
    let chain = chain_client_from_url(args.network, args.chain_backend, chain_url)
        .await
        .map_err(|e| anyhow!("chain client: {}", e))?;

    let source = ClnRestSource::new(
        args.cln_rest.clone(),
        args.cln_rune.clone(),
        args.cln_accept_invalid_certs,
    )
    .map_err(|e| anyhow!("clnrest client: {}", e))?;

    let kv = RedbKvStore::new(network_dir.join(GRAPH_DIR))
        .map_err(|e| anyhow!("open graph store: {}", e))?;
    let store = Arc::new(KvGraphStore(kv));

    let mut funding = FundingTxCache::new(chain.clone(), Arc::new(JsonFileCache::new(&network_dir)))
        .with_intervals(args.cache_save_interval(), args.log_interval());
    funding.init();
    info!("loaded {} cached funding transactions", funding.len());

    let mut sync = GraphSync::new(
        Arc::new(source),
        chain,
        store,
        funding,
        Arc::new(StandardClock()),
        args.sync_config(),
    );
    sync.run_forever(shutdown).await;
    Ok(())
}
