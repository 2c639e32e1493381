use anyhow::Context;
use gpuhunt_orchestrator::hunt::Hunter;
use gpuhunt_orchestrator::provider_manager::ProviderManager;
use gpuhunt_orchestrator::settings::Settings;
use gpuhunt_orchestrator::state::HuntState;
use gpuhunt_orchestrator::status_api::{self, StatusApiState};
use gpuhunt_orchestrator::{balance_job, logger, shutdown};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let settings = match Settings::from_env() {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("❌ Invalid configuration: {}", e);
            return Err(e).context("failed to load settings");
        }
    };
    let _log_guard = logger::init(settings.log_file.as_deref())?;

    let provider = ProviderManager::get_provider(&settings)?;
    let state = Arc::new(HuntState::new(settings.ignore_machine_ids.clone()));
    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    // Ctrl-C stops new orders; in-flight monitors return without destroying.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received, shutting down...");
            let _ = shutdown_tx.send(true);
        }
    });

    // job-balance
    if let Some(interval) = settings.balance_interval {
        let provider = provider.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            balance_job::run(provider, interval, rx).await;
        });
    }

    if let Some(addr) = settings.status_addr {
        let api_state = Arc::new(StatusApiState {
            hunt: state.clone(),
            max_orders: settings.max_orders,
        });
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = status_api::serve(addr, api_state, rx).await {
                tracing::error!("❌ status api stopped: {:#}", e);
            }
        });
    }

    let summary = Hunter::new(provider, settings.clone(), state, shutdown_rx)
        .run()
        .await;
    tracing::info!(
        "Script finished execution ({}/{} orders running).",
        summary.successful_orders,
        summary.max_orders
    );
    Ok(())
}
