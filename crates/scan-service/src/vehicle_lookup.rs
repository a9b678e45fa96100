use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use common::plates::normalize_plate;
use reqwest::Url;
use serde_json::{Map, Value};
use std::time::Duration;
use telemetry::metrics::VEHICLE_LOOKUPS;
use tracing::instrument;

/// Opaque registry record returned for a plate
pub type VehicleRecord = Map<String, Value>;

#[async_trait]
pub trait VehicleLookup: Send + Sync {
    async fn lookup(&self, plate: &str) -> Result<VehicleRecord>;
}

/// Vehicle registry reached over HTTP with `GET {base}?{param}={plate}`
pub struct HttpVehicleLookup {
    base: Url,
    query_param: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpVehicleLookup {
    pub fn new(base: Url, query_param: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base,
            query_param: query_param.into(),
            api_key,
            client,
        })
    }

    /// Request URL for an already normalized plate
    pub fn endpoint(&self, plate: &str) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut().append_pair(&self.query_param, plate);
        url
    }

    async fn fetch(&self, plate: &str) -> Result<VehicleRecord> {
        let mut request = self.client.get(self.endpoint(plate));
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let resp = request
            .send()
            .await
            .context("vehicle lookup request failed")?;
        let resp = resp
            .error_for_status()
            .context("vehicle lookup returned error status")?;
        resp.json()
            .await
            .context("failed to parse vehicle lookup response")
    }
}

#[async_trait]
impl VehicleLookup for HttpVehicleLookup {
    #[instrument(skip(self))]
    async fn lookup(&self, plate: &str) -> Result<VehicleRecord> {
        let plate = normalize_plate(plate);
        if plate.is_empty() {
            VEHICLE_LOOKUPS.with_label_values(&["rejected"]).inc();
            bail!("plate is empty after normalization");
        }

        let result = self.fetch(&plate).await;
        let status = if result.is_ok() { "success" } else { "failure" };
        VEHICLE_LOOKUPS.with_label_values(&[status]).inc();
        result
    }
}
