use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Counters {
    placed_orders: u32,
    successful_orders: u32,
    destroyed_instances: u32,
    destroy_failures: u32,
    in_flight: u32,
    per_model_success: BTreeMap<String, u32>,
    per_model_in_flight: BTreeMap<String, u32>,
    ignored_machines: Vec<u64>,
}

/// Run-wide counters and the machine ignore list, shared by the hunt loop and every monitor.
///
/// Nothing here survives a restart.
#[derive(Debug)]
pub struct HuntState {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    inner: Mutex<Counters>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub max_orders: u32,
    pub placed_orders: u32,
    pub successful_orders: u32,
    pub in_flight: u32,
    pub destroyed_instances: u32,
    pub destroy_failures: u32,
    pub per_model_success: BTreeMap<String, u32>,
    pub ignored_machines: Vec<u64>,
}

impl Default for HuntState {
    fn default() -> Self {
        Self::new(vec![])
    }
}

impl HuntState {
    pub fn new(ignore_machine_ids: Vec<u64>) -> Self {
        let mut counters = Counters::default();
        for id in ignore_machine_ids {
            if !counters.ignored_machines.contains(&id) {
                counters.ignored_machines.push(id);
            }
        }
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            inner: Mutex::new(counters),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        // every update is a single step, so a poisoned lock is still consistent
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn successful_orders(&self) -> u32 {
        self.lock().successful_orders
    }

    pub fn destroyed_instances(&self) -> u32 {
        self.lock().destroyed_instances
    }

    pub fn in_flight(&self) -> u32 {
        self.lock().in_flight
    }

    pub fn target_reached(&self, max_orders: u32) -> bool {
        self.lock().successful_orders >= max_orders
    }

    /// Orders we may still place without overshooting `max_orders` once in-flight monitors finish.
    pub fn remaining_capacity(&self, max_orders: u32) -> u32 {
        let c = self.lock();
        max_orders.saturating_sub(c.successful_orders + c.in_flight)
    }

    pub fn model_has_capacity(&self, model: &str, target: Option<u32>) -> bool {
        let Some(target) = target else {
            return true;
        };
        let c = self.lock();
        let done = c.per_model_success.get(model).copied().unwrap_or(0);
        let pending = c.per_model_in_flight.get(model).copied().unwrap_or(0);
        done + pending < target
    }

    pub fn is_ignored(&self, machine_id: u64) -> bool {
        self.lock().ignored_machines.contains(&machine_id)
    }

    /// Returns true when the machine was not ignored before.
    pub fn ignore_machine(&self, machine_id: u64) -> bool {
        let mut c = self.lock();
        if c.ignored_machines.contains(&machine_id) {
            return false;
        }
        c.ignored_machines.push(machine_id);
        true
    }

    pub fn ignored_machines(&self) -> Vec<u64> {
        self.lock().ignored_machines.clone()
    }

    pub fn begin_monitor(&self, model: &str) {
        let mut c = self.lock();
        c.placed_orders += 1;
        c.in_flight += 1;
        *c.per_model_in_flight.entry(model.to_string()).or_insert(0) += 1;
    }

    pub fn end_monitor(&self, model: &str) {
        let mut c = self.lock();
        c.in_flight = c.in_flight.saturating_sub(1);
        if let Some(n) = c.per_model_in_flight.get_mut(model) {
            *n = n.saturating_sub(1);
        }
    }

    /// Returns the new global success count.
    pub fn record_success(&self, model: &str) -> u32 {
        let mut c = self.lock();
        c.successful_orders += 1;
        *c.per_model_success.entry(model.to_string()).or_insert(0) += 1;
        c.successful_orders
    }

    pub fn record_destroyed(&self, machine_id: u64) {
        let mut c = self.lock();
        c.destroyed_instances += 1;
        if !c.ignored_machines.contains(&machine_id) {
            c.ignored_machines.push(machine_id);
        }
    }

    pub fn record_destroy_failed(&self) {
        self.lock().destroy_failures += 1;
    }

    pub fn snapshot(&self, max_orders: u32) -> StatusSnapshot {
        let c = self.lock();
        StatusSnapshot {
            run_id: self.run_id,
            started_at: self.started_at,
            max_orders,
            placed_orders: c.placed_orders,
            successful_orders: c.successful_orders,
            in_flight: c.in_flight,
            destroyed_instances: c.destroyed_instances,
            destroy_failures: c.destroy_failures,
            per_model_success: c.per_model_success.clone(),
            ignored_machines: c.ignored_machines.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_ignore_list_is_deduplicated() {
        let s = HuntState::new(vec![5, 6, 5]);
        assert_eq!(s.ignored_machines(), vec![5, 6]);
        assert!(s.is_ignored(6));
        assert!(!s.ignore_machine(5));
        assert!(s.ignore_machine(7));
        assert_eq!(s.ignored_machines(), vec![5, 6, 7]);
    }

    #[test]
    fn capacity_counts_in_flight_orders() {
        let s = HuntState::default();
        assert_eq!(s.remaining_capacity(2), 2);
        s.begin_monitor("RTX 3060");
        assert_eq!(s.remaining_capacity(2), 1);
        s.begin_monitor("RTX 3060");
        assert_eq!(s.remaining_capacity(2), 0);

        assert_eq!(s.record_success("RTX 3060"), 1);
        s.end_monitor("RTX 3060");
        assert_eq!(s.remaining_capacity(2), 0);
        assert!(!s.target_reached(2));

        s.record_destroyed(99);
        s.end_monitor("RTX 3060");
        assert_eq!(s.remaining_capacity(2), 1);
        assert_eq!(s.in_flight(), 0);
        assert_eq!(s.destroyed_instances(), 1);
        assert!(s.is_ignored(99));
    }

    #[test]
    fn per_model_target_includes_pending() {
        let s = HuntState::default();
        assert!(s.model_has_capacity("RTX 3090", None));
        assert!(s.model_has_capacity("RTX 3090", Some(1)));
        s.begin_monitor("RTX 3090");
        assert!(!s.model_has_capacity("RTX 3090", Some(1)));
        assert!(s.model_has_capacity("RTX 3060", Some(1)));
        s.record_success("RTX 3090");
        s.end_monitor("RTX 3090");
        assert!(!s.model_has_capacity("RTX 3090", Some(1)));
        assert!(s.model_has_capacity("RTX 3090", Some(2)));
    }

    #[test]
    fn end_monitor_never_underflows() {
        let s = HuntState::default();
        s.end_monitor("RTX 3060");
        assert_eq!(s.in_flight(), 0);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let s = HuntState::new(vec![1]);
        s.begin_monitor("RTX 3060");
        s.record_success("RTX 3060");
        s.end_monitor("RTX 3060");
        s.record_destroy_failed();
        let snap = s.snapshot(6);
        assert_eq!(snap.max_orders, 6);
        assert_eq!(snap.placed_orders, 1);
        assert_eq!(snap.successful_orders, 1);
        assert_eq!(snap.destroy_failures, 1);
        assert_eq!(snap.per_model_success.get("RTX 3060"), Some(&1));
        assert_eq!(snap.ignored_machines, vec![1]);
        assert_eq!(snap.run_id, s.run_id());

        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["successful_orders"], 1);
    }
}
