use gpuhunt_common::{InstanceSnapshot, OrderOutcome, PlacedOrder};
use gpuhunt_providers::Marketplace;
use std::time::Duration;
use tokio::time::Instant;

use crate::settings::Settings;
use crate::shutdown::{sleep_or_shutdown, ShutdownReceiver};
use crate::state::HuntState;
use crate::terminator;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorPolicy {
    pub timeout: Duration,
    pub interval: Duration,
    pub min_gpu_util: Option<f64>,
    pub max_orders: u32,
}

impl MonitorPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout: settings.monitor_timeout,
            interval: settings.monitor_interval,
            min_gpu_util: settings.min_gpu_util,
            max_orders: settings.max_orders,
        }
    }

    /// Running, and busy enough when a utilization bar is configured.
    pub fn is_satisfied(&self, snap: &InstanceSnapshot) -> bool {
        if !snap.status().is_running() {
            return false;
        }
        match self.min_gpu_util {
            Some(min) => snap.gpu_util.map_or(false, |u| u >= min),
            None => true,
        }
    }
}

/// Poll an ordered instance until it satisfies the policy or the timeout passes.
///
/// A timed-out instance is destroyed and its machine ignored. Shutdown abandons
/// the instance as-is: it is neither counted nor destroyed.
pub async fn monitor_instance(
    provider: &dyn Marketplace,
    order: &PlacedOrder,
    policy: &MonitorPolicy,
    state: &HuntState,
    shutdown: &mut ShutdownReceiver,
) -> OrderOutcome {
    let instance_id = order.instance_id;
    let deadline = Instant::now() + policy.timeout;

    while Instant::now() < deadline {
        match provider.get_instance(instance_id).await {
            Ok(Some(snap)) if policy.is_satisfied(&snap) => {
                let total = state.record_success(&order.offer.gpu_name);
                tracing::info!(
                    "*** ORDER RUNNING: instance {} ({} on machine {}, ${:.4}/h) is up and running! Successful orders: {}/{} ***",
                    instance_id,
                    order.offer.gpu_name,
                    order.offer.machine_id,
                    order.offer.dph_total,
                    total,
                    policy.max_orders
                );
                if total >= policy.max_orders {
                    tracing::info!("🏁 Maximum order limit reached.");
                }
                return OrderOutcome::Running;
            }
            Ok(Some(snap)) => {
                let status = snap.status();
                if status.is_running() {
                    tracing::info!(
                        "Instance {} is running but GPU utilization {} is below {}%. Waiting for next check...",
                        instance_id,
                        snap.gpu_util
                            .map(|u| format!("{:.1}%", u))
                            .unwrap_or_else(|| "n/a".to_string()),
                        policy.min_gpu_util.unwrap_or(0.0)
                    );
                } else {
                    tracing::info!(
                        "Instance {} status: {}. Waiting for next check...",
                        instance_id,
                        status
                    );
                }
            }
            Ok(None) => {
                tracing::info!(
                    "Instance {} not visible yet. Waiting for next check...",
                    instance_id
                );
            }
            Err(e) => {
                tracing::error!(
                    "❌ Error fetching status for instance {}: {:#}",
                    instance_id,
                    e
                );
            }
        }

        if sleep_or_shutdown(policy.interval, shutdown).await {
            tracing::warn!(
                "Shutdown requested; leaving instance {} as-is (not counted, not destroyed)",
                instance_id
            );
            return OrderOutcome::Abandoned;
        }
    }

    tracing::warn!(
        "⏱️ Instance {} did not start running within {}s. Destroying this instance.",
        instance_id,
        policy.timeout.as_secs()
    );
    if terminator::destroy_and_ignore(provider, instance_id, order.offer.machine_id, state).await {
        OrderOutcome::Destroyed
    } else {
        OrderOutcome::DestroyFailed
    }
}

/// Run [`monitor_instance`] for an order already registered with `HuntState::begin_monitor`,
/// releasing its in-flight slot when done.
pub async fn supervise(
    provider: &dyn Marketplace,
    order: PlacedOrder,
    policy: MonitorPolicy,
    state: &HuntState,
    mut shutdown: ShutdownReceiver,
) -> OrderOutcome {
    let outcome = monitor_instance(provider, &order, &policy, state, &mut shutdown).await;
    state.end_monitor(&order.offer.gpu_name);
    tracing::debug!(
        "monitor for instance {} finished after {}s: {:?}",
        order.instance_id,
        (chrono::Utc::now() - order.placed_at).num_seconds(),
        outcome
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use gpuhunt_common::Offer;
    use gpuhunt_providers::mock::{MockMarketplace, MockOp, MockPoll};
    use gpuhunt_providers::OrderRequest;

    fn policy(min_gpu_util: Option<f64>) -> MonitorPolicy {
        MonitorPolicy {
            timeout: Duration::from_secs(300),
            interval: Duration::from_secs(30),
            min_gpu_util,
            max_orders: 6,
        }
    }

    async fn order_with_script(mock: &MockMarketplace, polls: Vec<MockPoll>) -> PlacedOrder {
        let offer = Offer {
            id: 5,
            machine_id: 55,
            gpu_name: "RTX 3090".to_string(),
            num_gpus: 1,
            dph_total: 0.08,
            cuda_max_good: Some(12.2),
            verified: Some(true),
            rentable: Some(true),
        };
        mock.add_offer(offer.clone());
        mock.script_instance(5, polls);
        let id = mock
            .place_order(5, &OrderRequest::new("img", 4, None))
            .await
            .unwrap()
            .new_contract
            .unwrap();
        PlacedOrder::new(offer, id)
    }

    #[test]
    fn gpu_util_bar_needs_a_reading() {
        let snap = |status: &str, util: Option<f64>| InstanceSnapshot {
            id: 1,
            machine_id: None,
            actual_status: Some(status.to_string()),
            gpu_util: util,
        };
        let p = policy(Some(80.0));
        assert!(p.is_satisfied(&snap("running", Some(80.0))));
        assert!(!p.is_satisfied(&snap("running", Some(79.9))));
        assert!(!p.is_satisfied(&snap("running", None)));
        assert!(!p.is_satisfied(&snap("loading", Some(99.0))));
        assert!(policy(None).is_satisfied(&snap("running", None)));
    }

    #[tokio::test(start_paused = true)]
    async fn running_after_a_few_polls_counts_success() {
        let mock = MockMarketplace::new();
        let order = order_with_script(
            &mock,
            vec![MockPoll::status("created"), MockPoll::status("loading"), MockPoll::running()],
        )
        .await;
        let state = HuntState::default();
        let (_tx, mut rx) = shutdown::channel();

        let outcome = monitor_instance(&mock, &order, &policy(None), &state, &mut rx).await;
        assert_eq!(outcome, OrderOutcome::Running);
        assert_eq!(state.successful_orders(), 1);
        assert_eq!(mock.calls().status_polls.len(), 3);
        assert!(mock.calls().destroys.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_destroys_and_ignores() {
        let mock = MockMarketplace::new();
        let order = order_with_script(&mock, vec![MockPoll::status("loading")]).await;
        let state = HuntState::default();
        let (_tx, mut rx) = shutdown::channel();

        let start = Instant::now();
        let outcome = monitor_instance(&mock, &order, &policy(None), &state, &mut rx).await;
        assert_eq!(outcome, OrderOutcome::Destroyed);
        assert!(start.elapsed() >= Duration::from_secs(300));
        // polls at 0, 30, ..., 270
        assert_eq!(mock.calls().status_polls.len(), 10);
        assert!(state.is_ignored(55));
        assert!(mock.is_destroyed(order.instance_id));
        assert_eq!(state.successful_orders(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_errors_keep_waiting() {
        let mock = MockMarketplace::new();
        let order = order_with_script(&mock, vec![MockPoll::running()]).await;
        mock.fail_next(MockOp::Status, 2);
        let state = HuntState::default();
        let (_tx, mut rx) = shutdown::channel();

        let outcome = monitor_instance(&mock, &order, &policy(None), &state, &mut rx).await;
        assert_eq!(outcome, OrderOutcome::Running);
        assert_eq!(mock.calls().status_polls.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_gpu_is_destroyed() {
        let mock = MockMarketplace::new();
        let order =
            order_with_script(&mock, vec![MockPoll::running().with_gpu_util(3.0)]).await;
        let state = HuntState::default();
        let (_tx, mut rx) = shutdown::channel();

        let outcome =
            monitor_instance(&mock, &order, &policy(Some(50.0)), &state, &mut rx).await;
        assert_eq!(outcome, OrderOutcome::Destroyed);
        assert!(state.is_ignored(55));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_destroy_is_reported() {
        let mock = MockMarketplace::new();
        let order = order_with_script(&mock, vec![MockPoll::status("exited")]).await;
        mock.set_destroy_result(false);
        let state = HuntState::default();
        let (_tx, mut rx) = shutdown::channel();

        let outcome = monitor_instance(&mock, &order, &policy(None), &state, &mut rx).await;
        assert_eq!(outcome, OrderOutcome::DestroyFailed);
        assert!(!state.is_ignored(55));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_without_destroying() {
        let mock = MockMarketplace::new();
        let order = order_with_script(&mock, vec![MockPoll::status("loading")]).await;
        let state = HuntState::default();
        let (tx, rx) = shutdown::channel();
        state.begin_monitor(&order.offer.gpu_name);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            let _ = tx.send(true);
        });
        let outcome = supervise(&mock, order, policy(None), &state, rx).await;
        assert_eq!(outcome, OrderOutcome::Abandoned);
        assert!(mock.calls().destroys.is_empty());
        assert_eq!(state.in_flight(), 0);
    }
}
