//! VATSIM wire documents and the HTTP transport that fetches them.
//!
//! Two documents are involved. The status document lists interchangeable mirrors
//! of the v3 data feed; the data document carries every connected pilot. Only the
//! fields this crate uses are modelled, everything else is ignored.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default HTTP timeout for status and data requests.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while fetching or decoding upstream documents
#[derive(Debug, Error)]
pub enum PollError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Status document lists no data endpoints")]
    NoDataEndpoints,

    /// The poller was stopped while the request was in flight
    #[error("Fetch cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// `status.json`: where to find the data feed
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VatsimStatus {
    #[serde(default)]
    pub data: StatusEndpoints,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StatusEndpoints {
    #[serde(default)]
    pub v3: Vec<String>,
}

impl VatsimStatus {
    /// Non-blank v3 data feed URLs
    pub fn data_urls(&self) -> Vec<String> {
        self.data
            .v3
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// `vatsim-data.json`: one snapshot of the network
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VatsimData {
    #[serde(default)]
    pub pilots: Vec<PilotReport>,
}

/// One connected pilot as reported by the network
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PilotReport {
    pub cid: i64,
    #[serde(default)]
    pub callsign: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    /// Feet above mean sea level
    #[serde(default)]
    pub altitude: i32,
    #[serde(default)]
    pub heading: i32,
    /// Knots
    #[serde(default)]
    pub groundspeed: i32,
    #[serde(default)]
    pub transponder: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub qnh_i_hg: f64,
    #[serde(default)]
    pub qnh_mb: i32,
    #[serde(default)]
    pub flight_plan: Option<FlightPlan>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FlightPlan {
    #[serde(default)]
    pub flight_rules: String,
    /// Full ICAO equipment string, e.g. `B738/M-SDE2E3FGHIJ1RWXY/LB1`
    #[serde(default)]
    pub aircraft: String,
    /// ICAO type designator only, e.g. `B738`
    #[serde(default)]
    pub aircraft_short: String,
    #[serde(default)]
    pub departure: String,
    #[serde(default)]
    pub arrival: String,
    #[serde(default)]
    pub alternate: String,
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub remarks: String,
}

/// Where upstream documents come from.
///
/// The poller only depends on this trait so tests can feed it canned documents.
#[async_trait]
pub trait VatsimSource: Send + Sync {
    async fn fetch_status(&self, url: &str) -> Result<VatsimStatus, PollError>;

    async fn fetch_data(&self, url: &str) -> Result<VatsimData, PollError>;
}

/// Fetches documents over HTTPS.
///
/// Uses a reusable `reqwest::Client` with connection pooling and timeouts.
pub struct HttpVatsimSource {
    http: reqwest::Client,
}

impl HttpVatsimSource {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, PollError> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl VatsimSource for HttpVatsimSource {
    async fn fetch_status(&self, url: &str) -> Result<VatsimStatus, PollError> {
        let body = self.get_bytes(url).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn fetch_data(&self, url: &str) -> Result<VatsimData, PollError> {
        let body = self.get_bytes(url).await?;
        let data: VatsimData = serde_json::from_slice(&body)?;
        tracing::debug!(url, pilots = data.pilots.len(), "VATSIM data feed fetched");
        Ok(data)
    }
}
