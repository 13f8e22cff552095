mod cli;

use clap::Parser;
use leadership::{store::RedisLockStore, Hooks, LeaderElection};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = cli::Cli::parse();

    if let Err(e) = run(cli).await {
        error!(error = %e, "leaderd exited with error");
        std::process::exit(1);
    }
}

async fn run(cli: cli::Cli) -> leadership::Result<()> {
    let store = RedisLockStore::connect(&cli.redis_url)
        .await?
        .with_key_prefix(cli.key_prefix.clone());

    let hooks = Hooks::new()
        .on_elected(|instance| info!(%instance, "Elected"))
        .on_renewing(|instance| info!(%instance, "Renewing"))
        .on_ousted(|instance| warn!(%instance, "Ousted"))
        .on_error(|instance, err| warn!(%instance, error = %err, "Election error"))
        .on_new_leader(|instance, leader| info!(%instance, %leader, "New leader"));

    let election = LeaderElection::new(cli.election_config(), Arc::new(store))?.with_hooks(hooks);
    info!(
        namespace = election.namespace(),
        instance = election.instance_id(),
        redis = %cli.redis_url,
        "leaderd starting"
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl-C handler");
            return;
        }
        info!("Received Ctrl-C, releasing lease");
        shutdown.cancel();
    });

    election.run(cancel).await;
    Ok(())
}
