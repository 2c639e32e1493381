use gpuhunt_common::{Offer, OrderOutcome, PlacedOrder, RateTable};
use gpuhunt_providers::{Marketplace, OrderRequest, SearchCriteria};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use crate::monitor::{self, MonitorPolicy};
use crate::settings::{MonitorMode, Settings};
use crate::shutdown::{self, ShutdownReceiver};
use crate::state::{HuntState, StatusSnapshot};

/// Keep offers whose model/price fit the rate table and whose machine is not ignored.
/// Vendor order is preserved.
pub fn select_candidates(offers: Vec<Offer>, rates: &RateTable, state: &HuntState) -> Vec<Offer> {
    offers
        .into_iter()
        .filter(|o| rates.accepts(o))
        .filter(|o| !state.is_ignored(o.machine_id))
        .collect()
}

/// The search -> order -> monitor loop.
pub struct Hunter {
    provider: Arc<dyn Marketplace>,
    settings: Arc<Settings>,
    state: Arc<HuntState>,
    shutdown: ShutdownReceiver,
    criteria: SearchCriteria,
    order_request: OrderRequest,
    policy: MonitorPolicy,
    monitors: JoinSet<OrderOutcome>,
}

impl Hunter {
    pub fn new(
        provider: Arc<dyn Marketplace>,
        settings: Arc<Settings>,
        state: Arc<HuntState>,
        shutdown: ShutdownReceiver,
    ) -> Self {
        let criteria = SearchCriteria::new(settings.rates.models(), settings.min_cuda)
            .verified_only(settings.verified_only);
        let order_request = OrderRequest::new(
            settings.order_image.clone(),
            settings.order_disk_gb,
            settings.order_onstart.clone(),
        );
        let policy = MonitorPolicy::from_settings(&settings);
        Self {
            provider,
            settings,
            state,
            shutdown,
            criteria,
            order_request,
            policy,
            monitors: JoinSet::new(),
        }
    }

    /// Run until the success target is reached or shutdown is requested.
    /// Spawned monitors are always awaited before returning.
    pub async fn run(mut self) -> StatusSnapshot {
        let max = self.settings.max_orders;
        tracing::info!(
            "🎯 Hunt {} started: target {} order(s), provider={}, monitor_mode={:?}",
            self.state.run_id(),
            max,
            self.provider.code(),
            self.settings.monitor_mode
        );
        tracing::info!("GPU DPH rates:");
        for (model, limit) in self.settings.rates.iter() {
            match limit.target {
                Some(t) => tracing::info!("  {}: {}/hour (target {})", model, limit.max_dph, t),
                None => tracing::info!("  {}: {}/hour", model, limit.max_dph),
            }
        }

        if !self.settings.initial_delay.is_zero() {
            tracing::info!(
                "Waiting for {} seconds before the first attempt to check offers...",
                self.settings.initial_delay.as_secs()
            );
            if shutdown::sleep_or_shutdown(self.settings.initial_delay, &mut self.shutdown).await
            {
                return self.finish().await;
            }
        }

        match self.provider.check_connection().await {
            Ok(()) => tracing::info!("Connection with API established and working fine."),
            Err(e) => tracing::error!("❌ Error connecting to API: {:#}", e),
        }

        let mut tick = tokio::time::interval(self.settings.loop_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_check: Option<Instant> = None;

        while !self.state.target_reached(max) {
            tick.tick().await;
            if shutdown::is_requested(&self.shutdown) {
                tracing::warn!("Shutdown requested; stopping offer checks.");
                break;
            }
            self.reap_finished();

            let due = last_check.map_or(true, |t| t.elapsed() >= self.settings.check_interval);
            if due {
                last_check = Some(Instant::now());
                self.check_offers().await;
            }
        }

        self.finish().await
    }

    /// One search cycle. Returns the number of orders placed.
    pub async fn check_offers(&mut self) -> usize {
        let max = self.settings.max_orders;
        tracing::info!(
            "Offers check: placed orders {}/{} | in flight {} | destroyed instances {} | ignored machine ids {:?}",
            self.state.successful_orders(),
            max,
            self.state.in_flight(),
            self.state.destroyed_instances(),
            self.state.ignored_machines()
        );
        if self.state.remaining_capacity(max) == 0 {
            tracing::info!("All order slots are taken by monitored instances; skipping search.");
            return 0;
        }

        let offers = match self.provider.search_offers(&self.criteria).await {
            Ok(offers) => offers,
            Err(e) => {
                tracing::error!("❌ Offers check failed: {:#}", e);
                return 0;
            }
        };
        let found = offers.len();
        let candidates = select_candidates(offers, &self.settings.rates, &self.state);
        if candidates.is_empty() {
            tracing::info!("No matching offers found based on DPH rates ({} listed).", found);
            return 0;
        }
        for offer in &candidates {
            tracing::info!(
                "Found matching offer {} for {} at ${:.4}/h (machine {}).",
                offer.id,
                offer.gpu_name,
                offer.dph_total,
                offer.machine_id
            );
        }

        let mut placed = 0;
        for offer in candidates {
            if shutdown::is_requested(&self.shutdown) {
                break;
            }
            if self.state.remaining_capacity(max) == 0 {
                tracing::debug!("no remaining order capacity; skipping the rest of this cycle");
                break;
            }
            // An inline monitor earlier in this cycle may have ignored the machine.
            if self.state.is_ignored(offer.machine_id) {
                continue;
            }
            let target = self
                .settings
                .rates
                .limit_for(&offer.gpu_name)
                .and_then(|l| l.target);
            if !self.state.model_has_capacity(&offer.gpu_name, target) {
                tracing::debug!("{} target reached; skipping offer {}", offer.gpu_name, offer.id);
                continue;
            }
            if self.settings.verify_before_order && !self.verify_offer(&offer).await {
                continue;
            }
            if let Some(order) = self.place_order(offer).await {
                placed += 1;
                self.start_monitor(order).await;
            }
        }
        placed
    }

    /// Re-fetch the offer and make sure its price still fits (no DPH drift).
    async fn verify_offer(&self, offer: &Offer) -> bool {
        match self.provider.get_offer(offer.id).await {
            Ok(Some(fresh)) if self.settings.rates.accepts(&fresh) => true,
            Ok(Some(fresh)) => {
                tracing::warn!(
                    "⚠️ Offer {} ({}) drifted from ${:.4}/h to ${:.4}/h; skipping.",
                    offer.id,
                    offer.gpu_name,
                    offer.dph_total,
                    fresh.dph_total
                );
                false
            }
            Ok(None) => {
                tracing::info!("Offer {} is no longer listed; skipping.", offer.id);
                false
            }
            Err(e) => {
                tracing::warn!("⚠️ Could not verify offer {}: {:#}; skipping.", offer.id, e);
                false
            }
        }
    }

    async fn place_order(&self, offer: Offer) -> Option<PlacedOrder> {
        let resp = match self.provider.place_order(offer.id, &self.order_request).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::error!(
                    "❌ Failed to place order for offer {} (machine {}): {:#}",
                    offer.id,
                    offer.machine_id,
                    e
                );
                return None;
            }
        };
        if !resp.success {
            tracing::warn!(
                "⚠️ Order for offer {} rejected: {}",
                offer.id,
                resp.error
                    .or(resp.message)
                    .unwrap_or_else(|| "no reason given".to_string())
            );
            return None;
        }
        let Some(instance_id) = resp.new_contract else {
            tracing::error!(
                "❌ Order was successful but couldn't retrieve 'new_contract' (instance ID) for machine_id: {}",
                offer.machine_id
            );
            return None;
        };
        tracing::info!(
            "*** ORDER PLACED: {} on machine {} at ${:.4}/h -> instance {} ***",
            offer.gpu_name,
            offer.machine_id,
            offer.dph_total,
            instance_id
        );
        Some(PlacedOrder::new(offer, instance_id))
    }

    async fn start_monitor(&mut self, order: PlacedOrder) {
        self.state.begin_monitor(&order.offer.gpu_name);
        match self.settings.monitor_mode {
            MonitorMode::Inline => {
                tracing::info!(
                    "Monitoring instance {} for 'running' status...",
                    order.instance_id
                );
                monitor::supervise(
                    self.provider.as_ref(),
                    order,
                    self.policy,
                    &self.state,
                    self.shutdown.clone(),
                )
                .await;
            }
            MonitorMode::Spawn => {
                tracing::info!(
                    "Monitoring instance {} for 'running' status in a separate task...",
                    order.instance_id
                );
                let provider = self.provider.clone();
                let state = self.state.clone();
                let policy = self.policy;
                let shutdown = self.shutdown.clone();
                self.monitors.spawn(async move {
                    monitor::supervise(provider.as_ref(), order, policy, &state, shutdown).await
                });
            }
        }
    }

    fn reap_finished(&mut self) {
        while let Some(res) = self.monitors.try_join_next() {
            if let Err(e) = res {
                tracing::error!("❌ monitor task failed: {}", e);
            }
        }
    }

    async fn finish(mut self) -> StatusSnapshot {
        if !self.monitors.is_empty() {
            tracing::info!("Waiting for {} monitor(s) to finish...", self.monitors.len());
        }
        while let Some(res) = self.monitors.join_next().await {
            if let Err(e) = res {
                tracing::error!("❌ monitor task failed: {}", e);
            }
        }
        let snap = self.state.snapshot(self.settings.max_orders);
        tracing::info!(
            "Hunt finished: {}/{} successful order(s), {} destroyed, {} ignored machine(s).",
            snap.successful_orders,
            snap.max_orders,
            snap.destroyed_instances,
            snap.ignored_machines.len()
        );
        snap
    }
}
