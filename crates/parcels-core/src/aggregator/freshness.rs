//! Freshness analysis of stored responses
//!
//! Decides, per source, whether the latest stored response is still good
//! enough to serve or the source has to be fetched again. Pure: no I/O, no
//! clock reads, no events. The caller turns the report into events.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use tracing::debug;

use super::{StatusCategory, parse_response};
use crate::config::FreshnessConfig;
use crate::model::{RawResponse, ResponseStatus, SourceName, TrackingInfo};
use crate::registry::SourceRegistry;

/// One interval-based refetch decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CacheDecision {
    pub source: SourceName,
    pub category: StatusCategory,
    pub refetch: bool,
}

/// Outcome of analysing the stored responses of one tracking number
#[derive(Debug, Default)]
pub(crate) struct FreshnessReport {
    /// Sources to fetch, in registry order (empty when delivered)
    pub refetch: Vec<SourceName>,
    /// Some stored response already shows the parcel as delivered
    pub delivered: bool,
    /// Successfully parsed stored responses
    pub cached: HashMap<SourceName, TrackingInfo>,
    /// Interval decisions, in registry order
    pub decisions: Vec<CacheDecision>,
}

/// Analyse the latest stored response of every registered source
pub(crate) fn analyze(
    registry: &SourceRegistry,
    stored: &HashMap<SourceName, RawResponse>,
    now: DateTime<Utc>,
    config: &FreshnessConfig,
) -> FreshnessReport {
    let mut report = FreshnessReport::default();

    for (name, source) in registry.iter() {
        let Some(response) = stored.get(name) else {
            // Never seen by this source
            report.refetch.push(name.clone());
            continue;
        };

        if response.is_success() {
            match parse_response(source.as_ref(), response) {
                Ok(info) => {
                    if info.is_delivered() {
                        report.delivered = true;
                    }
                    report.cached.insert(name.clone(), info);
                }
                Err(e) => {
                    debug!(source = %name, error = %e, "Ignoring unparseable stored response");
                }
            }
        }

        // Parsing continues so every cached parse can be served
        if report.delivered {
            continue;
        }

        if is_past(now, response.last_fetched_at, config.expiry()) {
            // Probably a reused tracking number
            report.refetch.push(name.clone());
            continue;
        }

        let (category, interval) = match response.status {
            ResponseStatus::Success => (StatusCategory::Success, config.ok_check_interval()),
            ResponseStatus::NotFound => {
                (StatusCategory::NotFound, config.not_found_check_interval())
            }
            ResponseStatus::UnknownError => (
                StatusCategory::UnknownError,
                config.unknown_error_check_interval(),
            ),
            ResponseStatus::RateLimitExceeded => (
                StatusCategory::RateLimited,
                config.rate_limited_check_interval(),
            ),
        };

        let refetch = is_past(now, response.last_fetched_at, interval);
        if refetch {
            report.refetch.push(name.clone());
        }
        report.decisions.push(CacheDecision {
            source: name.clone(),
            category,
            refetch,
        });
    }

    if report.delivered {
        report.refetch.clear();
    }

    report
}

/// `now` is strictly after `since + interval`
fn is_past(now: DateTime<Utc>, since: DateTime<Utc>, interval: TimeDelta) -> bool {
    match since.checked_add_signed(interval) {
        Some(until) => now > until,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::model::{TrackingEvent, TrackingStatus};
    use crate::traits::TrackingSource;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tokio::time::Instant;

    /// Parses bodies of the form "STATUS,STATUS,..."; "garbage" fails
    struct CsvSource(&'static str);

    #[async_trait]
    impl TrackingSource for CsvSource {
        async fn fetch(&self, tracking_number: &str, _deadline: Instant) -> RawResponse {
            RawResponse::failed(tracking_number, self.source_name(), ResponseStatus::UnknownError)
        }

        fn parse(&self, response: &RawResponse) -> Result<TrackingInfo> {
            let body = String::from_utf8_lossy(&response.body);
            if body == "garbage" {
                return Err(Error::parse(self.0, "garbage"));
            }
            let events = body
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|s| TrackingEvent {
                    time: response.first_fetched_at,
                    description: s.to_string(),
                    status: if s == "DELIVERED" {
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
                origin_country: String::new(),
                destination_country: String::new(),
                events,
            })
        }

        fn source_name(&self) -> SourceName {
            SourceName::from(self.0)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn registry(names: &[&'static str]) -> SourceRegistry {
        let mut registry = SourceRegistry::new();
        for name in names {
            registry.register(Arc::new(CsvSource(name))).unwrap();
        }
        registry
    }

    fn stored(
        source: &str,
        status: ResponseStatus,
        body: &str,
        age: TimeDelta,
    ) -> (SourceName, RawResponse) {
        let mut response = RawResponse::new("RS1", SourceName::from(source), status, body);
        response.id = Some(1);
        response.first_fetched_at = now() - age;
        response.last_fetched_at = now() - age;
        (SourceName::from(source), response)
    }

    fn names(list: &[SourceName]) -> Vec<&str> {
        list.iter().map(|n| n.as_str()).collect()
    }

    #[test]
    fn test_unknown_sources_are_fetched() {
        let report = analyze(
            &registry(&["a", "b"]),
            &HashMap::new(),
            now(),
            &FreshnessConfig::default(),
        );
        assert_eq!(names(&report.refetch), vec!["a", "b"]);
        assert!(!report.delivered);
        assert!(report.cached.is_empty());
        assert!(report.decisions.is_empty());
    }

    #[test]
    fn test_fresh_success_is_served_from_cache() {
        let stored = HashMap::from([stored(
            "a",
            ResponseStatus::Success,
            "ACCEPTED",
            TimeDelta::hours(12),
        )]);
        let report = analyze(&registry(&["a"]), &stored, now(), &FreshnessConfig::default());

        assert!(report.refetch.is_empty());
        let info = &report.cached[&SourceName::from("a")];
        assert_eq!(info.last_fetched_at, now() - TimeDelta::hours(12));
        assert_eq!(
            report.decisions,
            vec![CacheDecision {
                source: SourceName::from("a"),
                category: StatusCategory::Success,
                refetch: false,
            }]
        );
    }

    #[test]
    fn test_interval_boundary_is_exclusive() {
        let config = FreshnessConfig::default();
        let at_boundary = HashMap::from([stored(
            "a",
            ResponseStatus::Success,
            "ACCEPTED",
            config.ok_check_interval(),
        )]);
        let report = analyze(&registry(&["a"]), &at_boundary, now(), &config);
        assert!(report.refetch.is_empty());

        let past_boundary = HashMap::from([stored(
            "a",
            ResponseStatus::Success,
            "ACCEPTED",
            config.ok_check_interval() + TimeDelta::seconds(1),
        )]);
        let report = analyze(&registry(&["a"]), &past_boundary, now(), &config);
        assert_eq!(names(&report.refetch), vec!["a"]);
    }

    #[test]
    fn test_intervals_by_status() {
        let stored = HashMap::from([
            stored("ok", ResponseStatus::Success, "X", TimeDelta::hours(25)),
            stored("missing", ResponseStatus::NotFound, "", TimeDelta::hours(25)),
            stored("broken", ResponseStatus::UnknownError, "", TimeDelta::hours(4)),
            stored("throttled", ResponseStatus::RateLimitExceeded, "", TimeDelta::hours(2)),
        ]);
        let report = analyze(
            &registry(&["ok", "missing", "broken", "throttled"]),
            &stored,
            now(),
            &FreshnessConfig::default(),
        );

        assert_eq!(names(&report.refetch), vec!["ok", "broken"]);
        let categories: Vec<(StatusCategory, bool)> = report
            .decisions
            .iter()
            .map(|d| (d.category, d.refetch))
            .collect();
        assert_eq!(
            categories,
            vec![
                (StatusCategory::Success, true),
                (StatusCategory::NotFound, false),
                (StatusCategory::UnknownError, true),
                (StatusCategory::RateLimited, false),
            ]
        );
    }

    #[test]
    fn test_expired_history_is_refetched_regardless_of_status() {
        let stored = HashMap::from([stored(
            "a",
            ResponseStatus::NotFound,
            "",
            TimeDelta::days(7 * 30),
        )]);
        let report = analyze(&registry(&["a"]), &stored, now(), &FreshnessConfig::default());

        assert_eq!(names(&report.refetch), vec!["a"]);
        // Expiry is not an interval decision
        assert!(report.decisions.is_empty());
    }

    #[test]
    fn test_delivered_suppresses_all_fetches() {
        let stored = HashMap::from([
            stored("a", ResponseStatus::Success, "ACCEPTED", TimeDelta::days(2)),
            stored("b", ResponseStatus::Success, "ACCEPTED,DELIVERED", TimeDelta::days(2)),
            stored("c", ResponseStatus::Success, "ACCEPTED", TimeDelta::days(2)),
        ]);
        let report = analyze(
            &registry(&["a", "b", "c", "d"]),
            &stored,
            now(),
            &FreshnessConfig::default(),
        );

        assert!(report.delivered);
        assert!(report.refetch.is_empty());
        // Parsing continues after delivery is detected
        assert_eq!(report.cached.len(), 3);
        // Only "a" was decided before delivery was seen
        assert_eq!(report.decisions.len(), 1);
        assert_eq!(report.decisions[0].source.as_str(), "a");
    }

    #[test]
    fn test_parse_failures_are_ignored() {
        let stored = HashMap::from([stored(
            "a",
            ResponseStatus::Success,
            "garbage",
            TimeDelta::hours(1),
        )]);
        let report = analyze(&registry(&["a"]), &stored, now(), &FreshnessConfig::default());

        assert!(report.cached.is_empty());
        assert!(report.refetch.is_empty());
        assert_eq!(report.decisions.len(), 1);
    }

    #[test]
    fn test_non_success_records_are_not_parsed() {
        let stored = HashMap::from([stored(
            "a",
            ResponseStatus::UnknownError,
            "DELIVERED",
            TimeDelta::hours(1),
        )]);
        let report = analyze(&registry(&["a"]), &stored, now(), &FreshnessConfig::default());

        assert!(!report.delivered);
        assert!(report.cached.is_empty());
    }
}
