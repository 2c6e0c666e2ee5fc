//! Tracking data model
//!
//! Raw responses are what the history store persists; tracking info is what
//! sources parse them into and what a lookup returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Name of a tracking source (the registry key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceName(String);

impl SourceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for SourceName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for SourceName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Outcome of one fetch attempt against a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    NotFound,
    RateLimitExceeded,
    UnknownError,
}

impl ResponseStatus {
    /// Stable string form, used by persistent stores
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Success => "success",
            ResponseStatus::NotFound => "not_found",
            ResponseStatus::RateLimitExceeded => "rate_limit_exceeded",
            ResponseStatus::UnknownError => "unknown_error",
        }
    }

    /// Parse the string form produced by [`ResponseStatus::as_str`]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(ResponseStatus::Success),
            "not_found" => Some(ResponseStatus::NotFound),
            "rate_limit_exceeded" => Some(ResponseStatus::RateLimitExceeded),
            "unknown_error" => Some(ResponseStatus::UnknownError),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One raw response from a tracking source, as stored in history
///
/// `first_fetched_at` is when this exact body was first seen,
/// `last_fetched_at` when it was most recently confirmed unchanged.
/// `id` is assigned by the history store on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    pub id: Option<i64>,
    pub tracking_number: String,
    pub source_name: SourceName,
    pub first_fetched_at: DateTime<Utc>,
    pub last_fetched_at: DateTime<Utc>,
    pub body: Vec<u8>,
    pub status: ResponseStatus,
}

impl RawResponse {
    /// Create a freshly fetched response
    ///
    /// Timestamps are provisional; the aggregator stamps both with its own
    /// clock before the record is stored.
    pub fn new(
        tracking_number: impl Into<String>,
        source_name: SourceName,
        status: ResponseStatus,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            tracking_number: tracking_number.into(),
            source_name,
            first_fetched_at: now,
            last_fetched_at: now,
            body: body.into(),
            status,
        }
    }

    /// Response carrying an error status and no body
    pub fn failed(
        tracking_number: impl Into<String>,
        source_name: SourceName,
        status: ResponseStatus,
    ) -> Self {
        Self::new(tracking_number, source_name, status, Vec::new())
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// Normalized parcel lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackingStatus {
    ShipmentInfoReceived,
    PackagingComplete,
    DispatchedFromWarehouse,
    /// Warehouse management system confirmed the parcel
    WmsConfirmed,
    ArrivedAtSortingCenter,
    AcceptedByCarrier,
    DepartedFromSortingCenter,
    #[serde(rename = "ARRIVED_AT_DEPARTURE_TRANSPORT_HUB")]
    ArrivedAtDepartureHub,
    #[serde(rename = "TRANSIT_PORT_REROUTE_CALLBACK")]
    TransitPortReroute,
    ExportCustomsClearanceStarted,
    ExportCustomsClearanceSuccess,
    #[serde(rename = "LEAVING_FROM_DEPARTURE_COUNTRY_OR_REGION")]
    LeavingDepartureRegion,
    ImportCustomsClearanceStarted,
    ImportCustomsClearanceSuccess,
    #[serde(rename = "DEPARTED_ORIGIN_COUNTRY_OR_REGION")]
    DepartedOriginRegion,
    ArrivedAtLinehaulOffice,
    ArrivedAtCustoms,
    DepartedFromCustoms,
    Delivered,
    Unknown,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::ShipmentInfoReceived => "SHIPMENT_INFO_RECEIVED",
            TrackingStatus::PackagingComplete => "PACKAGING_COMPLETE",
            TrackingStatus::DispatchedFromWarehouse => "DISPATCHED_FROM_WAREHOUSE",
            TrackingStatus::WmsConfirmed => "WMS_CONFIRMED",
            TrackingStatus::ArrivedAtSortingCenter => "ARRIVED_AT_SORTING_CENTER",
            TrackingStatus::AcceptedByCarrier => "ACCEPTED_BY_CARRIER",
            TrackingStatus::DepartedFromSortingCenter => "DEPARTED_FROM_SORTING_CENTER",
            TrackingStatus::ArrivedAtDepartureHub => "ARRIVED_AT_DEPARTURE_TRANSPORT_HUB",
            TrackingStatus::TransitPortReroute => "TRANSIT_PORT_REROUTE_CALLBACK",
            TrackingStatus::ExportCustomsClearanceStarted => "EXPORT_CUSTOMS_CLEARANCE_STARTED",
            TrackingStatus::ExportCustomsClearanceSuccess => "EXPORT_CUSTOMS_CLEARANCE_SUCCESS",
            TrackingStatus::LeavingDepartureRegion => "LEAVING_FROM_DEPARTURE_COUNTRY_OR_REGION",
            TrackingStatus::ImportCustomsClearanceStarted => "IMPORT_CUSTOMS_CLEARANCE_STARTED",
            TrackingStatus::ImportCustomsClearanceSuccess => "IMPORT_CUSTOMS_CLEARANCE_SUCCESS",
            TrackingStatus::DepartedOriginRegion => "DEPARTED_ORIGIN_COUNTRY_OR_REGION",
            TrackingStatus::ArrivedAtLinehaulOffice => "ARRIVED_AT_LINEHAUL_OFFICE",
            TrackingStatus::ArrivedAtCustoms => "ARRIVED_AT_CUSTOMS",
            TrackingStatus::DepartedFromCustoms => "DEPARTED_FROM_CUSTOMS",
            TrackingStatus::Delivered => "DELIVERED",
            TrackingStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One checkpoint in a parcel's journey
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub time: DateTime<Utc>,
    pub description: String,
    pub status: TrackingStatus,
}

/// Normalized tracking information from one source
///
/// Never persisted by the core: it is re-derived from the stored raw
/// response on every lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingInfo {
    pub tracking_number: String,
    pub source_name: SourceName,
    /// When the underlying raw response was last confirmed
    pub last_fetched_at: DateTime<Utc>,
    pub origin_country: String,
    pub destination_country: String,
    /// Events in the order the source reported them
    pub events: Vec<TrackingEvent>,
}

impl TrackingInfo {
    /// Whether any event marks the parcel as delivered
    ///
    /// Scans from the end: delivery is normally the last event.
    pub fn is_delivered(&self) -> bool {
        self.events
            .iter()
            .rev()
            .any(|event| event.status == TrackingStatus::Delivered)
    }
}
