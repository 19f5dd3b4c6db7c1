//! Recheck loop for configured collections.
//!
//! Indexing is blocking work, so opening and rechecking a collection run
//! on tokio's blocking pool while the loop itself only schedules them.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use grib_index::{CollectionManager, CollectionSpec, IndexConfig, RecheckOutcome};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::collections::load_collection_specs;
use crate::commands::planner;

/// Upper bound on how long the loop sleeps between due checks.
const MAX_TICK: Duration = Duration::from_secs(60);

pub async fn run(config: IndexConfig, config_dir: &Path, once: bool) -> Result<()> {
    let specs = load_collection_specs(config_dir)?;
    if specs.is_empty() {
        bail!("no collections defined under {}", config_dir.join("collections").display());
    }

    let mut managers = Vec::with_capacity(specs.len());
    for spec in specs {
        let name = spec.name.clone();
        match open(config.clone(), spec).await {
            Ok(manager) => managers.push(Arc::new(manager)),
            Err(e) => error!(collection = %name, error = %e, "Failed to open collection"),
        }
    }
    if managers.is_empty() {
        bail!("no collection could be opened");
    }

    if once {
        for manager in &managers {
            recheck(manager.clone()).await;
        }
        return Ok(());
    }

    let (shutdown_tx, mut shutdown) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx.send(()).ok();
    });

    let tick = managers
        .iter()
        .map(|m| Duration::from_secs(m.spec().recheck_secs))
        .min()
        .unwrap_or(MAX_TICK)
        .min(MAX_TICK);
    let mut last_check: HashMap<String, Instant> = managers
        .iter()
        .map(|m| (m.spec().name.clone(), Instant::now()))
        .collect();

    info!(collections = managers.len(), tick_secs = tick.as_secs(), "Watching collections");
    loop {
        for manager in &managers {
            let interval = Duration::from_secs(manager.spec().recheck_secs);
            let due = last_check
                .get(&manager.spec().name)
                .map_or(true, |t| t.elapsed() >= interval);
            if due {
                recheck(manager.clone()).await;
                last_check.insert(manager.spec().name.clone(), Instant::now());
            }
        }

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutting down watcher");
                break;
            }
            _ = tokio::time::sleep(tick) => {}
        }
    }
    Ok(())
}

async fn open(config: IndexConfig, spec: CollectionSpec) -> Result<CollectionManager> {
    tokio::task::spawn_blocking(move || -> Result<CollectionManager> {
        let planner = planner(&config)?;
        Ok(CollectionManager::open(spec, planner)?)
    })
    .await?
}

async fn recheck(manager: Arc<CollectionManager>) {
    let name = manager.spec().name.clone();
    let result = tokio::task::spawn_blocking(move || manager.recheck()).await;
    match result {
        Ok(Ok(RecheckOutcome::Unchanged)) => {}
        Ok(Ok(outcome)) => info!(collection = %name, ?outcome, "Collection updated"),
        Ok(Err(e)) => error!(collection = %name, error = %e, "Recheck failed"),
        Err(e) => error!(collection = %name, error = %e, "Recheck task panicked"),
    }
}
