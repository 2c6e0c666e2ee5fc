// # Fetch Fan-out
//
// One task per selected source, all joined against a single deadline.
//
// Sources receive the deadline and are expected to honor it, but nothing
// here depends on that: once the deadline passes, the JoinSet is dropped,
// which aborts every task still running. Their results never reach the
// caller.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::model::{RawResponse, SourceName};
use crate::registry::SourceRegistry;

/// Fetch `sources` concurrently and collect whatever completes by `deadline`
///
/// The returned map only contains sources whose fetch finished in time.
/// Responses are keyed by (and stamped with) the registry name they were
/// launched under.
pub(crate) async fn fetch_all(
    registry: &SourceRegistry,
    tracking_number: &str,
    sources: &[SourceName],
    deadline: Instant,
) -> HashMap<SourceName, RawResponse> {
    let mut tasks = JoinSet::new();

    for name in sources {
        let Some(source) = registry.get(name.as_str()) else {
            warn!(source = %name, "Skipping fetch for unregistered source");
            continue;
        };

        let source = Arc::clone(source);
        let name = name.clone();
        let tracking_number = tracking_number.to_string();
        tasks.spawn(async move {
            let response = source.fetch(&tracking_number, deadline).await;
            (name, response)
        });
    }

    let mut fetched = HashMap::with_capacity(tasks.len());
    loop {
        match tokio::time::timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(Ok((name, mut response)))) => {
                debug!(source = %name, status = %response.status, "Fetch completed");
                response.source_name = name.clone();
                response.tracking_number = tracking_number.to_string();
                fetched.insert(name, response);
            }
            Ok(Some(Err(e))) => {
                // Treated like a fetch that never completed
                error!(tracking_number, "Fetch task failed: {}", e);
            }
            Ok(None) => break,
            Err(_) => {
                warn!(
                    tracking_number,
                    pending = tasks.len(),
                    "Fetch deadline elapsed, abandoning outstanding fetches"
                );
                break;
            }
        }
    }

    fetched
}
