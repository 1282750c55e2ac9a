use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use poolshift::prelude::*;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Demo tasks submitted at startup
const DEMO_TASKS: u64 = 12;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "poolshift=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("poolshift starting...");

    let config = EngineConfig::from_env();
    tracing::info!(
        default_capacity = config.default_capacity,
        max_concurrent_resizes = config.max_concurrent_resizes,
        retire_timeout_ms = config.retire_timeout.as_millis() as u64,
        "Engine configured"
    );

    let manager = Arc::new(PoolManager::new(config));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleanup = tokio::spawn(Arc::clone(&manager).run_cleanup_loop(shutdown_rx));

    tokio::select! {
        result = run_demo(&manager) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Demo failed");
                let _ = shutdown_tx.send(true);
                manager.shutdown().await;
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    cleanup.await.ok();
    manager.shutdown().await;

    tracing::info!("poolshift shutdown complete");
    Ok(())
}

async fn run_demo(manager: &PoolManager) -> Result<()> {
    let pool = manager
        .create_pool(Some("default".into()), Some(2))
        .context("Failed to create demo pool")?;

    let mut tasks = Vec::new();
    for i in 0..DEMO_TASKS {
        let work = work_fn(move |ctx| async move {
            tokio::select! {
                _ = ctx.cancelled() => Err("stopped".to_string()),
                _ = tokio::time::sleep(Duration::from_millis(200 + 50 * i)) => {
                    Ok(serde_json::json!({ "step": i }))
                }
            }
        });
        let task = manager
            .submit_task(pool, Some(format!("demo-{i}")), work)
            .await
            .context("Failed to submit demo task")?;
        tasks.push(task);
    }

    let info = manager.get_resize_info(pool)?;
    tracing::info!(
        capacity = info.current_capacity,
        running = info.active_tasks,
        queued = info.queue_depth,
        suggested = info.suggested_capacity,
        rationale = %info.rationale,
        "Resize advice"
    );
    println!("{}", serde_json::to_string_pretty(&info)?);

    let outcome = manager.resize(pool, info.suggested_capacity).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if let Some(failure) = &outcome.failure {
        tracing::warn!(?failure, "Resize did not succeed");
    }

    for task in tasks {
        let record = manager.wait_for_task(task, Some(Duration::from_secs(30))).await?;
        tracing::info!(
            task_id = %record.id,
            name = %record.name,
            status = %record.status,
            owner = %record.owner_pool_id,
            "Task finished"
        );
    }

    let stats = manager.stats();
    tracing::info!(
        pools = stats.total_pools,
        tasks = stats.total_tasks,
        completed = stats.completed_tasks,
        "Demo complete"
    );
    Ok(())
}
