use crate::{Marketplace, OrderRequest, OrderResponse, SearchCriteria};
use anyhow::{Context, Result};
use async_trait::async_trait;
use gpuhunt_common::{InstanceSnapshot, Offer};
use reqwest::{Client, Response};
use serde_json::json;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://console.vast.ai/api/v0";

pub struct VastProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl VastProvider {
    pub fn new(base_url: &str, api_key: String) -> Result<Self> {
        // Default reqwest client has no overall timeout. If the API stalls, the hunt loop would hang.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .context("failed to build HTTP client")?;
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let api_key = api_key.trim().to_string();
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        headers
    }

    /// Turn a non-2xx response into an error carrying status and body.
    async fn ensure_success(op: &str, path: &str, resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            tracing::debug!("✅ [Vast API] {} {} succeeded: status={}", op, path, status.as_u16());
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        tracing::warn!(
            "❌ [Vast API] {} {} failed: status={}, response={}",
            op,
            path,
            status.as_u16(),
            text
        );
        Err(anyhow::anyhow!(
            "vast {} {} failed: status={} body={}",
            op,
            path,
            status.as_u16(),
            text
        ))
    }

    async fn post_bundles(&self, query: &serde_json::Value) -> Result<Vec<Offer>> {
        let path = "/bundles/";
        tracing::debug!("🔵 [Vast API] POST {} query={}", path, query);
        let resp = self
            .client
            .post(self.url(path))
            .headers(self.headers())
            .json(query)
            .send()
            .await
            .map_err(strip_url)?;
        let resp = Self::ensure_success("POST", path, resp).await?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(strip_url)
            .context("failed to parse JSON from offers response")?;
        Ok(parse_offers(&body))
    }
}

/// reqwest errors carry the request URL, and ours include the api key.
fn strip_url(e: reqwest::Error) -> reqwest::Error {
    e.without_url()
}

/// Extract offers from a `/bundles/` body, skipping entries that don't deserialize.
pub fn parse_offers(body: &serde_json::Value) -> Vec<Offer> {
    let Some(raw) = body.get("offers").and_then(|v| v.as_array()) else {
        return vec![];
    };
    raw.iter()
        .filter_map(|o| match serde_json::from_value::<Offer>(o.clone()) {
            Ok(offer) => Some(offer),
            Err(e) => {
                tracing::warn!("⚠️ [Vast API] skipping malformed offer: {}", e);
                None
            }
        })
        .collect()
}

/// The instance endpoint wraps the record in `instances`; null means unknown.
pub fn parse_instance(body: &serde_json::Value) -> Result<Option<InstanceSnapshot>> {
    match body.get("instances") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => {
            let snap = serde_json::from_value::<InstanceSnapshot>(v.clone())
                .context("failed to parse instance record")?;
            Ok(Some(snap))
        }
    }
}

pub fn parse_balance(body: &serde_json::Value) -> Option<f64> {
    body.get("credit")
        .and_then(|v| v.as_f64())
        .or_else(|| body.get("balance").and_then(|v| v.as_f64()))
}

#[async_trait]
impl Marketplace for VastProvider {
    fn code(&self) -> &'static str {
        "vast"
    }

    async fn check_connection(&self) -> Result<()> {
        let resp = self
            .client
            .get(self.url("/"))
            .headers(self.headers())
            .send()
            .await
            .map_err(strip_url)?;
        Self::ensure_success("GET", "/", resp).await?;
        Ok(())
    }

    async fn search_offers(&self, criteria: &SearchCriteria) -> Result<Vec<Offer>> {
        self.post_bundles(&criteria.to_query()).await
    }

    async fn get_offer(&self, offer_id: u64) -> Result<Option<Offer>> {
        let offers = self.post_bundles(&json!({"id": {"eq": offer_id}})).await?;
        Ok(offers.into_iter().find(|o| o.id == offer_id))
    }

    async fn place_order(&self, offer_id: u64, request: &OrderRequest) -> Result<OrderResponse> {
        let path = format!("/asks/{}/", offer_id);
        tracing::info!(
            "🔵 [Vast API] PUT {} - placing order: image={}, disk={}GB",
            path,
            request.image,
            request.disk_gb
        );
        let resp = self
            .client
            .put(self.url(&path))
            .query(&[("api_key", self.api_key.as_str())])
            .headers(self.headers())
            .json(request)
            .send()
            .await
            .map_err(strip_url)?;
        let resp = Self::ensure_success("PUT", &path, resp).await?;
        let order: OrderResponse = resp
            .json()
            .await
            .map_err(strip_url)
            .context("failed to parse order response")?;
        Ok(order)
    }

    async fn get_instance(&self, instance_id: u64) -> Result<Option<InstanceSnapshot>> {
        let path = format!("/instances/{}/", instance_id);
        let resp = self
            .client
            .get(self.url(&path))
            .query(&[("api_key", self.api_key.as_str())])
            .headers(self.headers())
            .send()
            .await
            .map_err(strip_url)?;
        let resp = Self::ensure_success("GET", &path, resp).await?;
        let body: serde_json::Value = resp.json().await.map_err(strip_url)?;
        parse_instance(&body)
    }

    async fn destroy_instance(&self, instance_id: u64) -> Result<bool> {
        let path = format!("/instances/{}/", instance_id);
        tracing::info!("🔵 [Vast API] DELETE {} - destroying instance", path);
        let resp = self
            .client
            .delete(self.url(&path))
            .query(&[("api_key", self.api_key.as_str())])
            .headers(self.headers())
            .send()
            .await
            .map_err(strip_url)?;
        let resp = Self::ensure_success("DELETE", &path, resp).await?;
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        let ok = body.get("success").and_then(|v| v.as_bool()) == Some(true);
        if !ok {
            tracing::warn!(
                "⚠️ [Vast API] DELETE {} returned without success: {}",
                path,
                body
            );
        }
        Ok(ok)
    }

    async fn get_balance(&self) -> Result<Option<f64>> {
        let path = "/users/current/";
        let resp = self
            .client
            .get(self.url(path))
            .query(&[("api_key", self.api_key.as_str())])
            .headers(self.headers())
            .send()
            .await
            .map_err(strip_url)?;
        let resp = Self::ensure_success("GET", path, resp).await?;
        let body: serde_json::Value = resp.json().await.map_err(strip_url)?;
        Ok(parse_balance(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_trims_base_url_and_key() {
        let p = VastProvider::new("https://example.test/api/v0/ ", " key\n".to_string()).unwrap();
        assert_eq!(p.url("/bundles/"), "https://example.test/api/v0/bundles/");
        assert_eq!(p.api_key, "key");
        assert_eq!(p.code(), "vast");
    }

    #[test]
    fn offers_skip_malformed_entries() {
        let body = json!({
            "offers": [
                {"id": 1, "machine_id": 11, "gpu_name": "RTX 3060", "dph_total": 0.04},
                {"gpu_name": "RTX 3090"},
                {"id": 3, "machine_id": 33, "gpu_name": "RTX 3090", "dph_total": 0.08, "num_gpus": 2}
            ]
        });
        let offers = parse_offers(&body);
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[1].num_gpus, 2);

        let unpriced = json!({"offers": [{"id": 1, "machine_id": 2, "gpu_name": "RTX 3060"}]});
        assert!(parse_offers(&unpriced).is_empty());
        assert!(parse_offers(&json!({"something": "else"})).is_empty());
    }

    #[test]
    fn instance_body_unwraps_instances_key() {
        let body = json!({"instances": {"id": 9, "actual_status": "loading", "gpu_util": 12.5}});
        let snap = parse_instance(&body).unwrap().unwrap();
        assert_eq!(snap.id, 9);
        assert_eq!(snap.gpu_util, Some(12.5));
        assert!(!snap.status().is_running());

        assert_eq!(parse_instance(&json!({"instances": null})).unwrap(), None);
        assert_eq!(parse_instance(&json!({})).unwrap(), None);
    }

    #[test]
    fn balance_prefers_credit() {
        assert_eq!(parse_balance(&json!({"credit": 4.5, "balance": 0.0})), Some(4.5));
        assert_eq!(parse_balance(&json!({"balance": 1.25})), Some(1.25));
        assert_eq!(parse_balance(&json!({})), None);
    }

    #[tokio::test]
    async fn transport_errors_do_not_leak_the_api_key() {
        // nothing listens on port 1
        let p = VastProvider::new("http://127.0.0.1:1/api/v0", "SECRETKEY123".to_string()).unwrap();
        let req = OrderRequest::new("img", 4, None);

        let errors = vec![
            p.place_order(5, &req).await.unwrap_err(),
            p.get_instance(5).await.unwrap_err(),
            p.destroy_instance(5).await.unwrap_err(),
            p.get_balance().await.unwrap_err(),
        ];
        for e in errors {
            let text = format!("{:#} {:?}", e, e);
            assert!(!text.contains("SECRETKEY123"), "api key leaked: {}", text);
        }
    }
}
