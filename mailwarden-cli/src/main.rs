//! Mailwarden engine entry point
//!
//! Assembles the component graph from the startup configuration, starts the
//! orchestrator and the import poller, and runs until interrupted. Transport
//! surfaces (record submission HTTP, dashboards) are separate deployables
//! that talk to the same stores.

use anyhow::Context;
use mailwarden_agents::AgentFactory;
use mailwarden_conviction::ConvictionStore;
use mailwarden_core::{CancelToken, EngineConfig, IspRegistry, SystemClock};
use mailwarden_executor::{DryRunChannel, Executor, ShellChannel, SshShellChannel};
use mailwarden_import::{FsBlobSource, Importer};
use mailwarden_memory::MemoryStore;
use mailwarden_orchestrator::{LogAlertSink, Orchestrator};
use mailwarden_signals::SignalProcessor;
use mailwarden_store::{SledStore, load_or_seed_isp_configs};
use mailwarden_suppression::{GlobalSuppressionHub, IspSuppressionSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = EngineConfig::load(config_path.as_deref()).context("loading configuration")?;
    info!(tenant = %config.tenant_id, dry_run = config.dry_run(), "mailwarden starting");

    let memory = MemoryStore::new(&config.data_dir).context("opening memory store")?;
    let store = Arc::new(
        SledStore::open(Path::new(&config.data_dir).join("store")).context("opening durable store")?,
    );
    let registry = Arc::new(IspRegistry::static_only());
    let processor = Arc::new(SignalProcessor::new(Some(memory.clone())));
    let convictions = Arc::new(ConvictionStore::new(Some(memory.clone())));

    let suppressions = Arc::new(IspSuppressionSet::new(
        config.tenant_id.clone(),
        &config.suppression_dir,
        store.clone(),
    ));
    let hub = Arc::new(GlobalSuppressionHub::new(
        config.tenant_id.clone(),
        &config.suppression_dir,
        store.clone(),
    ));
    suppressions.set_global_hub(hub.clone());

    let channel: Arc<dyn ShellChannel> = if config.dry_run() {
        Arc::new(DryRunChannel::new())
    } else {
        Arc::new(SshShellChannel::new(
            config.mta_host.clone(),
            config.mta_port,
            config.mta_user.clone(),
            config.mta_ssh_key_path.clone(),
        ))
    };
    let executor = Arc::new(Executor::new(channel, config.remote_suppression_dir.clone()));
    if !config.dry_run() {
        hub.set_remote_mirror(executor.clone());
        suppressions.set_remote_mirror(executor.clone());
    }

    let isp_configs = load_or_seed_isp_configs(store.as_ref(), &config.tenant_id)
        .await
        .context("loading isp configurations")?;
    let factory = AgentFactory::new(
        isp_configs,
        convictions.clone(),
        suppressions.clone(),
        Some(memory.clone()),
    );

    let mut orchestrator = Orchestrator::new(
        config.tenant_id.clone(),
        registry,
        processor,
        convictions,
        suppressions,
        hub.clone(),
        executor,
        memory,
        store.clone(),
        store.clone(),
        Arc::new(LogAlertSink),
        Arc::new(SystemClock),
    );

    let cancel = CancelToken::new();
    orchestrator.start(factory, cancel.clone()).await.context("starting orchestrator")?;

    let mut handles = orchestrator.handles();
    if !config.bucket.is_empty() {
        let importer = Importer::new(
            Arc::new(FsBlobSource::new(&config.bucket)),
            store.clone(),
            store.clone(),
            hub,
            config.tenant_id.clone(),
            config.list_id,
            Duration::from_secs(config.poll_interval * 60),
        );
        handles.push(importer.spawn_poller(cancel.child_token()));
    }

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown requested");
    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    info!("mailwarden stopped");
    Ok(())
}
