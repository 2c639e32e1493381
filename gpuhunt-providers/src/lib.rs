use anyhow::Result;
use async_trait::async_trait;
use gpuhunt_common::{InstanceSnapshot, Offer};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Short provider code used in logs ("vast", "mock").
    fn code(&self) -> &'static str;

    /// Probe the API root. Callers treat a failure as a warning, not a fatal error.
    async fn check_connection(&self) -> Result<()>;

    async fn search_offers(&self, criteria: &SearchCriteria) -> Result<Vec<Offer>>;

    /// Re-fetch a single offer right before ordering.
    /// Returns None when the offer is no longer listed.
    async fn get_offer(&self, offer_id: u64) -> Result<Option<Offer>>;

    async fn place_order(&self, offer_id: u64, request: &OrderRequest) -> Result<OrderResponse>;

    /// Returns None when the provider does not know the instance (yet).
    async fn get_instance(&self, instance_id: u64) -> Result<Option<InstanceSnapshot>>;

    /// Returns true only when the provider confirmed the deletion.
    async fn destroy_instance(&self, instance_id: u64) -> Result<bool>;

    // Optional: account balance in dollars.
    // Default implementation returns None (balance logging shows "unavailable").
    async fn get_balance(&self) -> Result<Option<f64>> {
        Ok(None)
    }
}

/// Offer search filter. Rendered into the vendor's JSON query by [`SearchCriteria::to_query`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCriteria {
    pub gpu_names: Vec<String>,
    pub min_cuda: f64,
    pub verified_only: bool,
    pub offer_type: String,
}

impl SearchCriteria {
    pub fn new(gpu_names: Vec<String>, min_cuda: f64) -> Self {
        Self {
            gpu_names,
            min_cuda,
            verified_only: false,
            offer_type: "on-demand".to_string(),
        }
    }

    pub fn verified_only(mut self, verified_only: bool) -> Self {
        self.verified_only = verified_only;
        self
    }

    pub fn to_query(&self) -> serde_json::Value {
        let verified = if self.verified_only {
            json!({"eq": true})
        } else {
            json!({})
        };
        json!({
            "verified": verified,
            "external": {"eq": false},
            "rentable": {"eq": true},
            "gpu_name": {"in": self.gpu_names},
            "cuda_max_good": {"gte": self.min_cuda},
            "type": self.offer_type,
            "intended_status": "running"
        })
    }

    /// Client-side equivalent of the query, used by providers that filter locally.
    pub fn matches(&self, offer: &Offer) -> bool {
        if !self.gpu_names.is_empty() && !self.gpu_names.iter().any(|g| g == &offer.gpu_name) {
            return false;
        }
        if offer.rentable == Some(false) {
            return false;
        }
        if self.verified_only && offer.verified != Some(true) {
            return false;
        }
        offer.cuda_max_good.unwrap_or(0.0) >= self.min_cuda
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub client_id: String,
    pub image: String,
    #[serde(rename = "disk")]
    pub disk_gb: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onstart: Option<String>,
}

impl OrderRequest {
    pub fn new(image: impl Into<String>, disk_gb: u32, onstart: Option<String>) -> Self {
        Self {
            client_id: "me".to_string(),
            image: image.into(),
            disk_gb,
            onstart: onstart.filter(|s| !s.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct OrderResponse {
    #[serde(default)]
    pub success: bool,
    /// Instance id of the new rental.
    #[serde(default)]
    pub new_contract: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, alias = "msg")]
    pub message: Option<String>,
}

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "vast")]
pub mod vast;
