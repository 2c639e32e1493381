//! Per-GPU-model price ceilings.
//!
//! Written as comma-separated `MODEL=MAX_DPH[:TARGET]` entries, e.g.
//! `RTX 3060=0.042, RTX 3090=0.083:2`. Declaration order is preserved so the
//! search criteria and status logs list models the way they were configured.
use crate::Offer;
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_GPU_DPH_RATES: &str = "RTX 3060=0.042,RTX 3090=0.083";

#[derive(Debug, Error, PartialEq)]
pub enum RateTableError {
    #[error("rate entry `{0}` is not of the form MODEL=MAX_DPH[:TARGET]")]
    Malformed(String),
    #[error("rate entry `{0}` has an empty GPU model")]
    EmptyModel(String),
    #[error("invalid max dph `{value}` for {model}")]
    InvalidPrice { model: String, value: String },
    #[error("invalid order target `{value}` for {model} (must be a positive integer)")]
    InvalidTarget { model: String, value: String },
    #[error("GPU model {0} is listed more than once")]
    Duplicate(String),
    #[error("rate table is empty")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateLimit {
    pub max_dph: f64,
    /// Optional per-model cap on successful orders.
    pub target: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RateTable {
    entries: Vec<(String, RateLimit)>,
}

impl RateTable {
    pub fn parse(raw: &str) -> Result<Self, RateTableError> {
        let mut table = RateTable::default();

        for entry in raw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let (model, rest) = entry
                .split_once('=')
                .ok_or_else(|| RateTableError::Malformed(entry.to_string()))?;
            let model = model.trim();
            if model.is_empty() {
                return Err(RateTableError::EmptyModel(entry.to_string()));
            }

            let (price, target) = match rest.split_once(':') {
                Some((p, t)) => (p.trim(), Some(t.trim())),
                None => (rest.trim(), None),
            };

            let max_dph = price
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or_else(|| RateTableError::InvalidPrice {
                    model: model.to_string(),
                    value: price.to_string(),
                })?;

            let target = match target {
                Some(t) => Some(t.parse::<u32>().ok().filter(|v| *v > 0).ok_or_else(|| {
                    RateTableError::InvalidTarget {
                        model: model.to_string(),
                        value: t.to_string(),
                    }
                })?),
                None => None,
            };

            if table.limit_for(model).is_some() {
                return Err(RateTableError::Duplicate(model.to_string()));
            }
            table
                .entries
                .push((model.to_string(), RateLimit { max_dph, target }));
        }

        if table.entries.is_empty() {
            return Err(RateTableError::Empty);
        }
        Ok(table)
    }

    pub fn limit_for(&self, gpu_name: &str) -> Option<&RateLimit> {
        self.entries
            .iter()
            .find(|(model, _)| model == gpu_name)
            .map(|(_, limit)| limit)
    }

    pub fn models(&self) -> Vec<String> {
        self.entries.iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RateLimit)> {
        self.entries.iter().map(|(m, l)| (m.as_str(), l))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the offer's GPU model is listed and its price is at or under the ceiling.
    pub fn accepts(&self, offer: &Offer) -> bool {
        self.limit_for(&offer.gpu_name)
            .map_or(false, |limit| offer.dph_total <= limit.max_dph)
    }
}
