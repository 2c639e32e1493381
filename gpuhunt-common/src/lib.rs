use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod rates;

pub use rates::{RateLimit, RateTable, RateTableError};

// -----------------------------------------------------------------------------
// Offers
// -----------------------------------------------------------------------------

/// A marketplace listing as returned by the offer search.
///
/// Only the fields we filter and log on are mapped; the vendor returns many more.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Offer {
    pub id: u64,
    pub machine_id: u64,
    #[serde(default)]
    pub gpu_name: String,
    #[serde(default = "default_num_gpus")]
    pub num_gpus: u32,
    /// Required: a listing without a price is never orderable.
    pub dph_total: f64,
    #[serde(default)]
    pub cuda_max_good: Option<f64>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub rentable: Option<bool>,
}

fn default_num_gpus() -> u32 {
    1
}

// -----------------------------------------------------------------------------
// Instances
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    Running,
    Loading,
    Created,
    Exited,
    Offline,
    Unknown(String),
}

impl InstanceStatus {
    /// Parse the vendor's `actual_status` field (case-insensitive).
    pub fn parse(raw: Option<&str>) -> Self {
        let s = raw.unwrap_or("").trim().to_ascii_lowercase();
        match s.as_str() {
            "running" => InstanceStatus::Running,
            "loading" => InstanceStatus::Loading,
            "created" => InstanceStatus::Created,
            "exited" => InstanceStatus::Exited,
            "offline" => InstanceStatus::Offline,
            "" => InstanceStatus::Unknown("unknown".to_string()),
            _ => InstanceStatus::Unknown(s),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, InstanceStatus::Running)
    }

    pub fn as_str(&self) -> &str {
        match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Loading => "loading",
            InstanceStatus::Created => "created",
            InstanceStatus::Exited => "exited",
            InstanceStatus::Offline => "offline",
            InstanceStatus::Unknown(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a rented instance.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InstanceSnapshot {
    pub id: u64,
    #[serde(default)]
    pub machine_id: Option<u64>,
    #[serde(default)]
    pub actual_status: Option<String>,
    #[serde(default)]
    pub gpu_util: Option<f64>,
}

impl InstanceSnapshot {
    pub fn status(&self) -> InstanceStatus {
        InstanceStatus::parse(self.actual_status.as_deref())
    }
}

// -----------------------------------------------------------------------------
// Orders
// -----------------------------------------------------------------------------

/// An accepted order whose instance still has to prove it is running.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub offer: Offer,
    pub instance_id: u64,
    pub placed_at: DateTime<Utc>,
}

impl PlacedOrder {
    pub fn new(offer: Offer, instance_id: u64) -> Self {
        Self {
            offer,
            instance_id,
            placed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderOutcome {
    /// Instance reached running (and the GPU utilization bar, when one is set).
    Running,
    /// Timed out and was destroyed; its machine is now ignored.
    Destroyed,
    /// Timed out but the destroy call did not succeed.
    DestroyFailed,
    /// Shutdown was requested while monitoring.
    Abandoned,
}
