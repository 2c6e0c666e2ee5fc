// # Cainiao Tracking Source
//
// This crate provides a Cainiao (global.cainiao.com) tracking source for the
// parcels aggregator.
//
// ## Behavior
//
// - ✅ One HTTP GET per fetch, bounded by the lookup deadline
// - ✅ Every failure encoded in the response status, never raised
// - ✅ Cainiao's "200 with an empty detail list" recognized as not found
// - ✅ Action codes mapped onto the shared tracking status vocabulary
// - ❌ NO retry logic (one bounded attempt per lookup)
// - ❌ NO caching (history is owned by the aggregator)
//
// ## Status Mapping
//
// | Outcome                          | ResponseStatus      |
// |----------------------------------|---------------------|
// | Transport error / timeout        | UnknownError        |
// | HTTP 404                         | NotFound            |
// | HTTP 429                         | RateLimitExceeded   |
// | Other non-200                    | UnknownError        |
// | 200 with `"detailList":[]`       | NotFound            |
// | 200 otherwise                    | Success             |
//
// ## API Reference
//
// - Detail: GET `/global/detail.json?mailNos=:tracking_number&lang=en-US`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parcels_core::model::{
    RawResponse, ResponseStatus, SourceName, TrackingEvent, TrackingInfo, TrackingStatus,
};
use parcels_core::{Error, Result, SourceRegistry, TrackingSource};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Registry name of this source
pub const SOURCE_NAME: &str = "cainiao";

/// Cainiao API base URL
pub const CAINIAO_API_BASE: &str = "https://global.cainiao.com";

/// Marker of a tracking number Cainiao knows nothing about
const EMPTY_DETAIL_LIST: &[u8] = br#""detailList":[]"#;

/// Cainiao tracking source
#[derive(Debug, Clone)]
pub struct CainiaoSource {
    base_url: String,
    client: reqwest::Client,
}

impl CainiaoSource {
    /// Create a source talking to the public Cainiao API
    pub fn new() -> Result<Self> {
        Self::with_base_url(CAINIAO_API_BASE)
    }

    /// Create a source talking to another endpoint (mirrors, tests)
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("parcels/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                Error::source_error(SOURCE_NAME, format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn detail_url(&self) -> String {
        format!("{}/global/detail.json", self.base_url)
    }

    fn response(
        &self,
        tracking_number: &str,
        status: ResponseStatus,
        body: Vec<u8>,
    ) -> RawResponse {
        RawResponse::new(tracking_number, self.source_name(), status, body)
    }
}

#[async_trait]
impl TrackingSource for CainiaoSource {
    async fn fetch(&self, tracking_number: &str, deadline: Instant) -> RawResponse {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!(tracking_number, "Deadline already passed, not fetching");
            return self.response(tracking_number, ResponseStatus::UnknownError, Vec::new());
        }

        let request = self
            .client
            .get(self.detail_url())
            .query(&[("mailNos", tracking_number), ("lang", "en-US")])
            .timeout(remaining);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(tracking_number, "Cainiao request failed: {}", e);
                return self.response(tracking_number, ResponseStatus::UnknownError, Vec::new());
            }
        };

        let http_status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(e) => {
                warn!(tracking_number, "Failed to read Cainiao response body: {}", e);
                None
            }
        };

        let (status, body) = classify(http_status, body);
        debug!(tracking_number, http_status, %status, "Cainiao fetch finished");
        self.response(tracking_number, status, body)
    }

    fn parse(&self, response: &RawResponse) -> Result<TrackingInfo> {
        let parsed: DetailResponse = serde_json::from_slice(&response.body)
            .map_err(|e| Error::parse(SOURCE_NAME, format!("Invalid JSON: {}", e)))?;

        let [module] = parsed.module.as_slice() else {
            return Err(Error::parse(
                SOURCE_NAME,
                format!("Expected exactly one module, got {}", parsed.module.len()),
            ));
        };

        let events = module
            .detail_list
            .iter()
            .map(Detail::to_event)
            .collect::<Result<Vec<_>>>()?;

        Ok(TrackingInfo {
            tracking_number: response.tracking_number.clone(),
            source_name: response.source_name.clone(),
            last_fetched_at: response.last_fetched_at,
            origin_country: module.origin_country.clone(),
            destination_country: module.dest_country.clone(),
            events,
        })
    }

    fn source_name(&self) -> SourceName {
        SourceName::from(SOURCE_NAME)
    }
}

/// Register a Cainiao source talking to the public API
pub fn register(registry: &mut SourceRegistry) -> Result<()> {
    registry.register(Arc::new(CainiaoSource::new()?))
}

/// Map an HTTP outcome onto a response status and stored body
///
/// `body` is `None` when reading it failed.
pub fn classify(http_status: u16, body: Option<Vec<u8>>) -> (ResponseStatus, Vec<u8>) {
    match (http_status, body) {
        (404, body) => (ResponseStatus::NotFound, body.unwrap_or_default()),
        (429, body) => (ResponseStatus::RateLimitExceeded, body.unwrap_or_default()),
        (200, None) => (ResponseStatus::UnknownError, Vec::new()),
        (200, Some(body)) => {
            if contains(&body, EMPTY_DETAIL_LIST) {
                (ResponseStatus::NotFound, body)
            } else {
                (ResponseStatus::Success, body)
            }
        }
        (_, body) => (ResponseStatus::UnknownError, body.unwrap_or_default()),
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Map a Cainiao action code onto the normalized tracking status
pub fn map_action_code(action_code: &str) -> TrackingStatus {
    match action_code {
        "GWMS_ACCEPT" => TrackingStatus::ShipmentInfoReceived,
        "GWMS_PACKAGE" => TrackingStatus::PackagingComplete,
        "GWMS_OUTBOUND" => TrackingStatus::DispatchedFromWarehouse,
        "WMS_CONFIRMED" => TrackingStatus::WmsConfirmed,
        "SC_INBOUND_SUCCESS" => TrackingStatus::ArrivedAtSortingCenter,
        "PU_PICKUP_SUCCESS" => TrackingStatus::AcceptedByCarrier,
        "SC_OUTBOUND_SUCCESS" => TrackingStatus::DepartedFromSortingCenter,
        "LH_HO_IN_SUCCESS" => TrackingStatus::ArrivedAtDepartureHub,
        "TRANSIT_PORT_REROUTE_CALLBACK" => TrackingStatus::TransitPortReroute,
        "CC_EX_START" => TrackingStatus::ExportCustomsClearanceStarted,
        "CC_EX_SUCCESS" => TrackingStatus::ExportCustomsClearanceSuccess,
        "LH_HO_AIRLINE" => TrackingStatus::LeavingDepartureRegion,
        "CC_IM_START" => TrackingStatus::ImportCustomsClearanceStarted,
        "LH_DEPART" => TrackingStatus::DepartedOriginRegion,
        "LH_ARRIVE" => TrackingStatus::ArrivedAtLinehaulOffice,
        "CC_HO_IN_SUCCESS" | "CUSTOMS_ARRIVED_IN_AREA_CALLBACK" => TrackingStatus::ArrivedAtCustoms,
        "CC_HO_OUT_SUCCESS" => TrackingStatus::DepartedFromCustoms,
        "CC_IM_SUCCESS" => TrackingStatus::ImportCustomsClearanceSuccess,
        "GTMS_SIGNED" | "SIGNED" | "DELIVERED" => TrackingStatus::Delivered,
        _ => TrackingStatus::Unknown,
    }
}

/// `/global/detail.json` response (only the fields we use)
#[derive(Debug, Deserialize)]
struct DetailResponse {
    #[serde(default)]
    module: Vec<Module>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Module {
    #[serde(default)]
    origin_country: String,
    #[serde(default)]
    dest_country: String,
    #[serde(default)]
    detail_list: Vec<Detail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Detail {
    /// Milliseconds since the Unix epoch (missing reads as the epoch)
    #[serde(default)]
    time: i64,
    #[serde(default)]
    desc: String,
    /// Sic: Cainiao's spelling
    #[serde(default)]
    standerd_desc: String,
    #[serde(default)]
    action_code: String,
}

impl Detail {
    fn to_event(&self) -> Result<TrackingEvent> {
        let time: DateTime<Utc> = DateTime::from_timestamp(self.time.div_euclid(1000), 0)
            .ok_or_else(|| {
                Error::parse(SOURCE_NAME, format!("Event time out of range: {}", self.time))
            })?;

        let description = if self.standerd_desc.is_empty() {
            self.desc.clone()
        } else {
            self.standerd_desc.clone()
        };

        Ok(TrackingEvent {
            time,
            description,
            status: map_action_code(&self.action_code),
        })
    }
}
