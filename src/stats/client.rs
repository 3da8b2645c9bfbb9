//! HTTP client for the engine's counter endpoint.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::timeout;
use url::Url;

use crate::model::Traffic;
use crate::stats::counters::{CounterName, Direction, Scope, TrafficSnapshot};

const QUERY_PATH: &str = "stats/query";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid stats endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("stats endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("stats query timed out after {0:?}")]
    Timeout(Duration),

    #[error("stats endpoint returned HTTP {0}")]
    Status(u16),

    #[error("malformed stats response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Counter values arrive as numbers or numeric strings depending on engine
/// version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CounterValue {
    Int(i64),
    Text(String),
}

impl Default for CounterValue {
    fn default() -> Self {
        CounterValue::Int(0)
    }
}

impl CounterValue {
    fn bytes(&self) -> u64 {
        let raw = match self {
            CounterValue::Int(v) => *v,
            CounterValue::Text(s) => s.trim().parse().unwrap_or(0),
        };
        u64::try_from(raw).unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    stat: Vec<NamedCounter>,
}

#[derive(Debug, Deserialize)]
struct NamedCounter {
    name: String,
    #[serde(default)]
    value: CounterValue,
}

#[derive(Debug, Deserialize)]
struct SingleResponse {
    #[serde(default)]
    stat: Option<SingleCounter>,
}

#[derive(Debug, Deserialize)]
struct SingleCounter {
    #[serde(default)]
    value: CounterValue,
}

/// Reset-on-read stats client. Every successful call zeroes what it read.
#[derive(Debug, Clone)]
pub struct StatsClient {
    http: reqwest::Client,
    query_url: Url,
    query_timeout: Duration,
    bulk_timeout: Duration,
}

impl StatsClient {
    pub fn new(base: Url, query_timeout: Duration, bulk_timeout: Duration) -> Result<Self, TelemetryError> {
        let http = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            http,
            query_url: base.join(QUERY_PATH)?,
            query_timeout,
            bulk_timeout,
        })
    }

    /// Client for the engine's loopback API listener.
    pub fn for_control_plane(
        listen: &str,
        port: u16,
        query_timeout: Duration,
        bulk_timeout: Duration,
    ) -> Result<Self, TelemetryError> {
        let host = if listen.contains(':') {
            format!("[{}]", listen)
        } else {
            listen.to_string()
        };
        let base = Url::parse(&format!("http://{}:{}/", host, port))?;
        Self::new(base, query_timeout, bulk_timeout)
    }

    /// Read and reset every counter in one request.
    pub async fn poll_all(&self) -> Result<TrafficSnapshot, TelemetryError> {
        let mut url = self.query_url.clone();
        url.query_pairs_mut().append_pair("reset", "true");

        let body: BulkResponse = self.get_json(url, self.bulk_timeout).await?;
        Ok(TrafficSnapshot::from_samples(
            body.stat.iter().map(|c| (c.name.as_str(), c.value.bytes())),
        ))
    }

    /// Read and reset one counter. A counter the engine does not know is 0.
    pub async fn query_stat(&self, name: &str) -> Result<u64, TelemetryError> {
        let mut url = self.query_url.clone();
        url.query_pairs_mut()
            .append_pair("name", name)
            .append_pair("reset", "true");

        let body: SingleResponse = self.get_json(url, self.query_timeout).await?;
        Ok(body.stat.map(|c| c.value.bytes()).unwrap_or(0))
    }

    pub async fn inbound_traffic(&self, tag: &str) -> Result<Traffic, TelemetryError> {
        self.entity_traffic(Scope::Inbound, tag).await
    }

    /// Traffic for a tenant, by stats key.
    pub async fn user_traffic(&self, key: &str) -> Result<Traffic, TelemetryError> {
        self.entity_traffic(Scope::User, key).await
    }

    async fn entity_traffic(&self, scope: Scope, entity: &str) -> Result<Traffic, TelemetryError> {
        let upload = self
            .query_stat(&CounterName::format(scope, entity, Direction::Uplink))
            .await?;
        let download = self
            .query_stat(&CounterName::format(scope, entity, Direction::Downlink))
            .await?;
        Ok(Traffic::new(upload, download))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, deadline: Duration) -> Result<T, TelemetryError> {
        let request = async {
            let response = self.http.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(TelemetryError::Status(status.as_u16()));
            }
            let body = response.bytes().await?;
            Ok::<T, TelemetryError>(serde_json::from_slice(&body)?)
        };

        timeout(deadline, request)
            .await
            .map_err(|_| TelemetryError::Timeout(deadline))?
    }
}
