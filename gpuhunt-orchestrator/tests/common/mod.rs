// Common test utilities and fixtures
#![allow(dead_code)]

use gpuhunt_common::{Offer, RateTable};
use gpuhunt_orchestrator::hunt::Hunter;
use gpuhunt_orchestrator::settings::{MonitorMode, ProviderKind, Settings};
use gpuhunt_orchestrator::shutdown;
use gpuhunt_orchestrator::state::{HuntState, StatusSnapshot};
use gpuhunt_providers::mock::MockMarketplace;
use std::sync::Arc;
use std::time::Duration;

pub fn offer(id: u64, machine_id: u64, gpu: &str, dph: f64) -> Offer {
    Offer {
        id,
        machine_id,
        gpu_name: gpu.to_string(),
        num_gpus: 1,
        dph_total: dph,
        cuda_max_good: Some(12.2),
        verified: Some(true),
        rentable: Some(true),
    }
}

/// Mock-backed settings with no startup delay, no balance job and no log file.
pub fn test_settings(max_orders: u32) -> Settings {
    Settings {
        provider: ProviderKind::Mock,
        rates: RateTable::parse("RTX 3060=0.042,RTX 3090=0.083").unwrap(),
        max_orders,
        check_interval: Duration::from_secs(30),
        loop_tick: Duration::from_secs(5),
        initial_delay: Duration::ZERO,
        monitor_timeout: Duration::from_secs(300),
        monitor_interval: Duration::from_secs(30),
        monitor_mode: MonitorMode::Spawn,
        balance_interval: None,
        log_file: None,
        ..Settings::default()
    }
}

/// Run a hunt to completion. With `stop_after`, shutdown is requested after that much (virtual) time.
pub async fn run_hunt(
    mock: Arc<MockMarketplace>,
    settings: Settings,
    stop_after: Option<Duration>,
) -> StatusSnapshot {
    let state = Arc::new(HuntState::new(settings.ignore_machine_ids.clone()));
    let (tx, rx) = shutdown::channel();
    let hunter = Hunter::new(mock, Arc::new(settings), state, rx);

    let stopper = tokio::spawn(async move {
        match stop_after {
            Some(d) => {
                tokio::time::sleep(d).await;
                let _ = tx.send(true);
            }
            None => std::future::pending::<()>().await,
        }
    });

    let snap = hunter.run().await;
    stopper.abort();
    snap
}
