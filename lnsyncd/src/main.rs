use std::fs;

use anyhow::{anyhow, Context};
#[allow(unused_imports)]
use log::{error, info};

use lnsyncd::config::parse_args_and_config;
use lnsyncd::daemon;
use lnsyncd::util::observability::init_tracing_subscriber;

pub fn main() -> anyhow::Result<()> {
    let args = parse_args_and_config();
    let network_dir = args.network_dir();
    fs::create_dir_all(&network_dir)
        .with_context(|| format!("create data directory {}", network_dir.display()))?;
    let _guard = init_tracing_subscriber(&network_dir, "lnsyncd", &args.log_level)
        .map_err(|e| anyhow!("tracing setup: {}", e))?;
    info!("lnsyncd {} starting on {}", env!("CARGO_PKG_VERSION"), args.network);
    start(args)
}

#[tokio::main(worker_threads = 2)]
async fn start(args: lnsyncd::config::SyncArgs) -> anyhow::Result<()> {
    let (shutdown_trigger, shutdown_signal) = triggered::trigger();
    ctrlc::set_handler(move || {
        shutdown_trigger.trigger();
    })
    .context("Error setting Ctrl-C handler")?;

    let res = daemon::run(&args, shutdown_signal).await;
    if let Err(e) = &res {
        error!("lnsyncd failed: {:#}", e);
    }
    info!("lnsyncd stopped");
    res
}
