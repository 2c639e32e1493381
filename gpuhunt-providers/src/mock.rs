use crate::{Marketplace, OrderRequest, OrderResponse, SearchCriteria};
use anyhow::Result;
use async_trait::async_trait;
use gpuhunt_common::{InstanceSnapshot, Offer};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// One scripted answer to a status poll.
#[derive(Debug, Clone, PartialEq)]
pub struct MockPoll {
    pub status: String,
    pub gpu_util: Option<f64>,
}

impl MockPoll {
    pub fn status(status: &str) -> Self {
        Self {
            status: status.to_string(),
            gpu_util: None,
        }
    }

    pub fn running() -> Self {
        Self::status("running")
    }

    pub fn with_gpu_util(mut self, gpu_util: f64) -> Self {
        self.gpu_util = Some(gpu_util);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Connect,
    Search,
    GetOffer,
    Place,
    Status,
    Destroy,
    Balance,
}

/// Everything the mock was asked to do, in call order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockCalls {
    pub searches: usize,
    pub verifications: Vec<u64>,
    pub orders: Vec<u64>,
    pub status_polls: Vec<u64>,
    pub destroys: Vec<u64>,
}

#[derive(Debug)]
struct MockInstance {
    machine_id: u64,
    script: Vec<MockPoll>,
    polls: usize,
    destroyed: bool,
}

#[derive(Debug)]
struct MockState {
    offers: Vec<Offer>,
    scripts: HashMap<u64, Vec<MockPoll>>,
    reprices: HashMap<u64, f64>,
    delist_on_verify: HashSet<u64>,
    instances: HashMap<u64, MockInstance>,
    failures: HashMap<MockOp, u32>,
    order_accepted: bool,
    omit_contract: bool,
    destroy_result: bool,
    balance: Option<f64>,
    next_contract: u64,
    calls: MockCalls,
}

/// In-memory marketplace for tests and dry runs.
///
/// Ordered offers disappear from later searches, the way a rented machine
/// stops being listed. Instances answer status polls from a per-offer script;
/// the last entry repeats once the script runs out. Without a script an
/// instance is running from the first poll.
pub struct MockMarketplace {
    state: Mutex<MockState>,
}

impl Default for MockMarketplace {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMarketplace {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                offers: vec![],
                scripts: HashMap::new(),
                reprices: HashMap::new(),
                delist_on_verify: HashSet::new(),
                instances: HashMap::new(),
                failures: HashMap::new(),
                order_accepted: true,
                omit_contract: false,
                destroy_result: true,
                balance: None,
                next_contract: 1000,
                calls: MockCalls::default(),
            }),
        }
    }

    pub fn with_offers(self, offers: Vec<Offer>) -> Self {
        self.lock().offers.extend(offers);
        self
    }

    pub fn add_offer(&self, offer: Offer) {
        self.lock().offers.push(offer);
    }

    /// Status answers for the instance created from `offer_id`.
    pub fn script_instance(&self, offer_id: u64, polls: Vec<MockPoll>) {
        self.lock().scripts.insert(offer_id, polls);
    }

    /// The offer's price as seen by `get_offer` (search keeps the old price).
    pub fn reprice_on_verify(&self, offer_id: u64, dph_total: f64) {
        self.lock().reprices.insert(offer_id, dph_total);
    }

    /// The offer is rented out by someone else between search and verification.
    pub fn delist_on_verify(&self, offer_id: u64) {
        self.lock().delist_on_verify.insert(offer_id);
    }

    /// Make the next `times` calls of `op` fail.
    pub fn fail_next(&self, op: MockOp, times: u32) {
        *self.lock().failures.entry(op).or_insert(0) += times;
    }

    pub fn set_order_accepted(&self, accepted: bool) {
        self.lock().order_accepted = accepted;
    }

    /// Accept orders but leave `new_contract` out of the response.
    pub fn set_omit_contract(&self, omit: bool) {
        self.lock().omit_contract = omit;
    }

    pub fn set_destroy_result(&self, ok: bool) {
        self.lock().destroy_result = ok;
    }

    pub fn set_balance(&self, balance: Option<f64>) {
        self.lock().balance = balance;
    }

    pub fn calls(&self) -> MockCalls {
        self.lock().calls.clone()
    }

    pub fn is_destroyed(&self, instance_id: u64) -> bool {
        self.lock()
            .instances
            .get(&instance_id)
            .map_or(false, |i| i.destroyed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_failure(state: &mut MockState, op: MockOp) -> Result<()> {
        if let Some(n) = state.failures.get_mut(&op) {
            if *n > 0 {
                *n -= 1;
                return Err(anyhow::anyhow!("mock {:?} failure (injected)", op));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Marketplace for MockMarketplace {
    fn code(&self) -> &'static str {
        "mock"
    }

    async fn check_connection(&self) -> Result<()> {
        let mut st = self.lock();
        Self::take_failure(&mut st, MockOp::Connect)
    }

    async fn search_offers(&self, criteria: &SearchCriteria) -> Result<Vec<Offer>> {
        let mut st = self.lock();
        st.calls.searches += 1;
        Self::take_failure(&mut st, MockOp::Search)?;
        Ok(st
            .offers
            .iter()
            .filter(|o| criteria.matches(o))
            .cloned()
            .collect())
    }

    async fn get_offer(&self, offer_id: u64) -> Result<Option<Offer>> {
        let mut st = self.lock();
        st.calls.verifications.push(offer_id);
        Self::take_failure(&mut st, MockOp::GetOffer)?;
        if st.delist_on_verify.remove(&offer_id) {
            st.offers.retain(|o| o.id != offer_id);
            return Ok(None);
        }
        let reprice = st.reprices.get(&offer_id).copied();
        Ok(st.offers.iter().find(|o| o.id == offer_id).map(|o| {
            let mut o = o.clone();
            if let Some(dph) = reprice {
                o.dph_total = dph;
            }
            o
        }))
    }

    async fn place_order(&self, offer_id: u64, _request: &OrderRequest) -> Result<OrderResponse> {
        let mut st = self.lock();
        st.calls.orders.push(offer_id);
        Self::take_failure(&mut st, MockOp::Place)?;

        let Some(pos) = st.offers.iter().position(|o| o.id == offer_id) else {
            return Ok(OrderResponse {
                success: false,
                error: Some("no_such_ask".to_string()),
                ..Default::default()
            });
        };
        if !st.order_accepted {
            return Ok(OrderResponse {
                success: false,
                error: Some("invalid_args".to_string()),
                ..Default::default()
            });
        }

        let offer = st.offers.remove(pos);
        let contract = st.next_contract;
        st.next_contract += 1;
        let script = st
            .scripts
            .get(&offer_id)
            .cloned()
            .unwrap_or_else(|| vec![MockPoll::running()]);
        st.instances.insert(
            contract,
            MockInstance {
                machine_id: offer.machine_id,
                script,
                polls: 0,
                destroyed: false,
            },
        );

        Ok(OrderResponse {
            success: true,
            new_contract: if st.omit_contract { None } else { Some(contract) },
            ..Default::default()
        })
    }

    async fn get_instance(&self, instance_id: u64) -> Result<Option<InstanceSnapshot>> {
        let mut st = self.lock();
        st.calls.status_polls.push(instance_id);
        Self::take_failure(&mut st, MockOp::Status)?;

        let Some(inst) = st.instances.get_mut(&instance_id) else {
            return Ok(None);
        };
        if inst.destroyed {
            return Ok(None);
        }
        let idx = inst.polls.min(inst.script.len().saturating_sub(1));
        inst.polls += 1;
        let poll = inst
            .script
            .get(idx)
            .cloned()
            .unwrap_or_else(|| MockPoll::status("unknown"));
        Ok(Some(InstanceSnapshot {
            id: instance_id,
            machine_id: Some(inst.machine_id),
            actual_status: Some(poll.status),
            gpu_util: poll.gpu_util,
        }))
    }

    async fn destroy_instance(&self, instance_id: u64) -> Result<bool> {
        let mut st = self.lock();
        st.calls.destroys.push(instance_id);
        Self::take_failure(&mut st, MockOp::Destroy)?;
        if !st.destroy_result {
            return Ok(false);
        }
        match st.instances.get_mut(&instance_id) {
            Some(inst) => {
                inst.destroyed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_balance(&self) -> Result<Option<f64>> {
        let mut st = self.lock();
        Self::take_failure(&mut st, MockOp::Balance)?;
        Ok(st.balance)
    }
}
