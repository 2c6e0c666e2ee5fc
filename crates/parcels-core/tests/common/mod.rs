//! Test doubles and common utilities for aggregator contract tests
//!
//! Sources are scripted (fixed status/body, optional delay) and count their
//! calls; the history store wraps the in-memory store, counts writes and can
//! be told to fail.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parcels_core::error::{Error, Result};
use parcels_core::{
    AggregatorConfig, AggregatorEvent, HistoryStore, ManualClock, MemoryHistoryStore,
    RawResponse, ResponseStatus, SourceName, SourceRegistry, TrackingAggregator, TrackingEvent,
    TrackingInfo, TrackingSource, TrackingStatus,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const TRACKING_NUMBER: &str = "RS0814398526Y";

/// A TrackingSource that returns whatever it was told to
///
/// Bodies are comma-separated event codes. `DELIVERED` maps to
/// [`TrackingStatus::Delivered`], everything else to `Unknown`; a body
/// containing `BROKEN` fails to parse.
pub struct ScriptedSource {
    name: &'static str,
    reply: Mutex<(ResponseStatus, Vec<u8>)>,
    delay: Mutex<Duration>,
    /// Call counter for fetch()
    fetch_call_count: Arc<AtomicUsize>,
    /// Call counter for parse()
    parse_call_count: Arc<AtomicUsize>,
}

impl ScriptedSource {
    /// Source answering `Success` with a single accepted event
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            reply: Mutex::new((ResponseStatus::Success, b"ACCEPTED".to_vec())),
            delay: Mutex::new(Duration::ZERO),
            fetch_call_count: Arc::new(AtomicUsize::new(0)),
            parse_call_count: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Change what the next fetches return
    pub fn respond(&self, status: ResponseStatus, body: &str) {
        *self.reply.lock().unwrap() = (status, body.as_bytes().to_vec());
    }

    /// Make every fetch take `delay` (ignoring the deadline)
    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Get the number of times fetch() was called
    pub fn fetch_call_count(&self) -> usize {
        self.fetch_call_count.load(Ordering::SeqCst)
    }

    /// Get the number of times parse() was called
    pub fn parse_call_count(&self) -> usize {
        self.parse_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackingSource for ScriptedSource {
    async fn fetch(&self, tracking_number: &str, _deadline: Instant) -> RawResponse {
        self.fetch_call_count.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let (status, body) = self.reply.lock().unwrap().clone();
        RawResponse::new(tracking_number, self.source_name(), status, body)
    }

    fn parse(&self, response: &RawResponse) -> Result<TrackingInfo> {
        self.parse_call_count.fetch_add(1, Ordering::SeqCst);

        let body = String::from_utf8_lossy(&response.body);
        if body.contains("BROKEN") {
            return Err(Error::parse(self.name, "broken body"));
        }

        let events = body
            .split(',')
            .filter(|code| !code.is_empty())
            .map(|code| TrackingEvent {
                time: t0(),
                description: code.to_string(),
                status: if code == "DELIVERED" {
                    TrackingStatus::Delivered
                } else {
                    TrackingStatus::Unknown
                },
            })
            .collect();

        Ok(TrackingInfo {
            tracking_number: response.tracking_number.clone(),
            source_name: self.source_name(),
            last_fetched_at: response.last_fetched_at,
            origin_country: "CN".to_string(),
            destination_country: "IL".to_string(),
            events,
        })
    }

    fn source_name(&self) -> SourceName {
        SourceName::from(self.name)
    }
}

/// A HistoryStore that tracks calls and can be made to fail
#[derive(Default)]
pub struct RecordingHistoryStore {
    inner: MemoryHistoryStore,
    get_latest_call_count: AtomicUsize,
    insert_call_count: AtomicUsize,
    update_call_count: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl RecordingHistoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Put a row in place without counting it as a write
    pub async fn seed(&self, response: RawResponse) {
        let tracking_number = response.tracking_number.clone();
        let source_name = response.source_name.clone();
        self.inner
            .insert(&tracking_number, &source_name, &response)
            .await
            .unwrap();
    }

    /// All rows for one source
    pub async fn rows(&self, source_name: &str) -> Vec<RawResponse> {
        self.inner.rows_for(TRACKING_NUMBER, source_name).await
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn get_latest_call_count(&self) -> usize {
        self.get_latest_call_count.load(Ordering::SeqCst)
    }

    pub fn insert_call_count(&self) -> usize {
        self.insert_call_count.load(Ordering::SeqCst)
    }

    pub fn update_call_count(&self) -> usize {
        self.update_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoryStore for RecordingHistoryStore {
    async fn get_latest(
        &self,
        tracking_number: &str,
        source_names: &[SourceName],
    ) -> Result<Vec<RawResponse>> {
        self.get_latest_call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::history_store("database is locked"));
        }
        self.inner.get_latest(tracking_number, source_names).await
    }

    async fn insert(
        &self,
        tracking_number: &str,
        source_name: &SourceName,
        response: &RawResponse,
    ) -> Result<()> {
        self.insert_call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::history_store("disk full"));
        }
        self.inner.insert(tracking_number, source_name, response).await
    }

    async fn update(&self, response: &RawResponse) -> Result<()> {
        self.update_call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::history_store("disk full"));
        }
        self.inner.update(response).await
    }
}

/// Fixed "now" used by the contract tests
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// A stored response last confirmed at `last_fetched_at`
pub fn stored_response(
    source: &str,
    status: ResponseStatus,
    body: &str,
    last_fetched_at: DateTime<Utc>,
) -> RawResponse {
    let mut response = RawResponse::new(TRACKING_NUMBER, SourceName::from(source), status, body);
    response.first_fetched_at = last_fetched_at;
    response.last_fetched_at = last_fetched_at;
    response
}

/// Build an aggregator over `sources` (registered in the given order)
pub fn aggregator(
    sources: &[Arc<ScriptedSource>],
    history: Arc<RecordingHistoryStore>,
    clock: ManualClock,
    config: AggregatorConfig,
) -> (TrackingAggregator, mpsc::Receiver<AggregatorEvent>) {
    let mut registry = SourceRegistry::new();
    for source in sources {
        registry.register(source.clone()).expect("unique source names");
    }

    TrackingAggregator::new(registry, history, Arc::new(clock), config)
        .expect("aggregator construction succeeds")
}

/// Collect every event emitted so far
pub fn drain_events(rx: &mut mpsc::Receiver<AggregatorEvent>) -> Vec<AggregatorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Names of the sources in a lookup result, in result order
pub fn source_names(result: &[TrackingInfo]) -> Vec<&str> {
    result.iter().map(|info| info.source_name.as_str()).collect()
}
