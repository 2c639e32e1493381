use gpuhunt_providers::Marketplace;
use std::sync::Arc;
use std::time::Duration;

use crate::shutdown::{sleep_or_shutdown, ShutdownReceiver};

/// job-balance: logs the account balance on a fixed interval until shutdown.
pub async fn run(provider: Arc<dyn Marketplace>, interval: Duration, mut shutdown: ShutdownReceiver) {
    tracing::info!("💰 job-balance started (every {}s)", interval.as_secs());

    loop {
        log_balance(provider.as_ref()).await;
        if sleep_or_shutdown(interval, &mut shutdown).await {
            break;
        }
    }
    tracing::debug!("💰 job-balance stopped");
}

pub async fn log_balance(provider: &dyn Marketplace) -> Option<f64> {
    match provider.get_balance().await {
        Ok(Some(balance)) => {
            tracing::info!("💰 Account balance: ${:.2}", balance);
            Some(balance)
        }
        Ok(None) => {
            tracing::info!("💰 Account balance: unavailable");
            None
        }
        Err(e) => {
            tracing::warn!("⚠️ job-balance error: {:#}", e);
            None
        }
    }
}
