//! Reconciliation of fetched responses against stored history
//!
//! For each registered source, decides between "serve the cache", "append a
//! new row" and "bump the timestamp of the existing row", performs the write
//! and works out which tracking info the source contributes. A fetched
//! response is unchanged only when both its status and its body match the
//! stored row. History writes are best effort: failures are logged and
//! reported as events, never returned.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, error, warn};

use super::{AggregatorEvent, TrackingAggregator, WriteOperation, parse_response};
use crate::model::{RawResponse, SourceName, TrackingInfo};
use crate::registry::SourceRegistry;

/// Everything one lookup knows about a tracking number before reconciling
pub(crate) struct LookupState {
    /// Latest stored response per source
    pub stored: HashMap<SourceName, RawResponse>,
    /// Freshly fetched responses (completed fetches only)
    pub fetched: HashMap<SourceName, RawResponse>,
    /// Stored responses that parsed successfully
    pub cached: HashMap<SourceName, TrackingInfo>,
}

impl TrackingAggregator {
    /// Reconcile fetched responses with history, in registry order
    ///
    /// Returns the tracking info each source contributes to the result.
    pub(crate) async fn reconcile(
        &self,
        tracking_number: &str,
        mut state: LookupState,
        now: DateTime<Utc>,
    ) -> HashMap<SourceName, TrackingInfo> {
        let mut surfaced = HashMap::new();

        for (name, source) in self.sources.iter() {
            let stored = state.stored.remove(name);
            let cached = state.cached.remove(name);

            let Some(mut fetched) = state.fetched.remove(name) else {
                // Not selected, or did not complete in time
                if let Some(info) = cached {
                    surfaced.insert(name.clone(), info);
                }
                continue;
            };

            match stored {
                // Same body under a new status (two empty error bodies) is a change
                Some(mut stored)
                    if stored.status == fetched.status && stored.body == fetched.body =>
                {
                    debug!(tracking_number, source = %name, "Fetched response unchanged");
                    self.emit_event(AggregatorEvent::FetchedUnchanged {
                        source: name.clone(),
                    });

                    stored.last_fetched_at = now;
                    if let Err(e) = self.history.update(&stored).await {
                        error!(
                            tracking_number,
                            source = %name,
                            "Failed to update stored response: {}",
                            e
                        );
                        self.emit_event(AggregatorEvent::HistoryWriteFailed {
                            source: name.clone(),
                            operation: WriteOperation::Update,
                            error: e.to_string(),
                        });
                    }

                    if let Some(mut info) = cached {
                        info.last_fetched_at = now;
                        surfaced.insert(name.clone(), info);
                    }
                }
                stored => {
                    let event = if stored.is_some() {
                        debug!(tracking_number, source = %name, "Fetched response changed");
                        AggregatorEvent::FetchedChanged {
                            source: name.clone(),
                        }
                    } else {
                        debug!(
                            tracking_number,
                            source = %name,
                            "Fetched response for the first time"
                        );
                        AggregatorEvent::FetchedFirst {
                            source: name.clone(),
                        }
                    };
                    self.emit_event(event);

                    fetched.id = None;
                    fetched.first_fetched_at = now;
                    fetched.last_fetched_at = now;
                    if let Err(e) = self.history.insert(tracking_number, name, &fetched).await {
                        // Duplicate rows from concurrent lookups are left to the store
                        error!(
                            tracking_number,
                            source = %name,
                            "Failed to insert fetched response: {}",
                            e
                        );
                        self.emit_event(AggregatorEvent::HistoryWriteFailed {
                            source: name.clone(),
                            operation: WriteOperation::Insert,
                            error: e.to_string(),
                        });
                    }

                    if !fetched.is_success() {
                        continue;
                    }
                    match parse_response(source.as_ref(), &fetched) {
                        Ok(info) => {
                            surfaced.insert(name.clone(), info);
                        }
                        Err(e) => {
                            warn!(
                                tracking_number,
                                source = %name,
                                "Failed to parse fetched response: {}",
                                e
                            );
                            self.emit_event(AggregatorEvent::ParseError {
                                source: name.clone(),
                            });
                        }
                    }
                }
            }
        }

        surfaced
    }
}

/// Order surfaced tracking info by registry order
pub(crate) fn build_result(
    registry: &SourceRegistry,
    mut surfaced: HashMap<SourceName, TrackingInfo>,
) -> Vec<TrackingInfo> {
    registry
        .names()
        .iter()
        .filter_map(|name| surfaced.remove(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::model::ResponseStatus;
    use crate::traits::TrackingSource;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tokio::time::Instant;

    struct Unused(&'static str);

    #[async_trait]
    impl TrackingSource for Unused {
        async fn fetch(&self, tracking_number: &str, _deadline: Instant) -> RawResponse {
            RawResponse::failed(tracking_number, self.source_name(), ResponseStatus::NotFound)
        }

        fn parse(&self, _response: &RawResponse) -> Result<TrackingInfo> {
            Err(Error::parse(self.0, "unused"))
        }

        fn source_name(&self) -> SourceName {
            SourceName::from(self.0)
        }
    }

    fn info(source: &str) -> TrackingInfo {
        TrackingInfo {
            tracking_number: "RS1".to_string(),
            source_name: SourceName::from(source),
            last_fetched_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            origin_country: String::new(),
            destination_country: String::new(),
            events: Vec::new(),
        }
    }

    #[test]
    fn test_build_result_follows_registry_order() {
        let mut registry = SourceRegistry::new();
        for name in ["c", "a", "b"] {
            registry.register(Arc::new(Unused(name))).unwrap();
        }

        let surfaced = HashMap::from([
            (SourceName::from("a"), info("a")),
            (SourceName::from("c"), info("c")),
            (SourceName::from("stray"), info("stray")),
        ]);
        let result = build_result(&registry, surfaced);

        let order: Vec<&str> = result.iter().map(|i| i.source_name.as_str()).collect();
        assert_eq!(order, vec!["c", "a"]);
    }

    #[test]
    fn test_build_result_empty() {
        let registry = SourceRegistry::new();
        assert!(build_result(&registry, HashMap::new()).is_empty());
    }
}
