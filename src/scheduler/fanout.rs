//! Concurrent per-location fan-out with an ordered join.

use super::ReportError;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::{self, JoinSet};

/// Run `compute` for every location on its own task and collect the results
/// in input order, regardless of the order in which the tasks finish.
///
/// Each location is bounded by `timeout`. The batch is fail-fast: the first
/// failure to complete aborts the tasks still outstanding and is returned
/// tagged with its location.
pub async fn fan_out<T, F, Fut>(
    locations: Vec<String>,
    timeout: Duration,
    compute: F,
) -> Result<Vec<T>, ReportError>
where
    T: Send + 'static,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, ReportError>> + Send + 'static,
{
    let mut set = JoinSet::new();
    let mut tasks: HashMap<task::Id, (usize, String)> = HashMap::with_capacity(locations.len());
    let mut slots: Vec<Option<T>> = Vec::with_capacity(locations.len());

    for (idx, location_id) in locations.into_iter().enumerate() {
        let work = tokio::time::timeout(timeout, compute(location_id.clone()));
        let handle = set.spawn(work);
        tasks.insert(handle.id(), (idx, location_id));
        slots.push(None);
    }

    while let Some(joined) = set.join_next_with_id().await {
        let id = match &joined {
            Ok((id, _)) => *id,
            Err(e) => e.id(),
        };
        let Some((idx, location_id)) = tasks.remove(&id) else {
            continue;
        };

        let err = match joined {
            Ok((_, Ok(Ok(value)))) => {
                slots[idx] = Some(value);
                continue;
            }
            Ok((_, Ok(Err(e)))) => ReportError::Location {
                location_id,
                source: Box::new(e),
            },
            Ok((_, Err(_))) => ReportError::Timeout {
                location_id,
                after: timeout,
            },
            Err(e) => ReportError::Panicked {
                location_id,
                reason: e.to_string(),
            },
        };

        let aborted = set.len();
        set.abort_all();
        tracing::warn!("Fan-out stopped: {} ({} tasks aborted)", err, aborted);
        return Err(err);
    }

    // every task reported a value, so no slot is empty
    Ok(slots.into_iter().flatten().collect())
}
