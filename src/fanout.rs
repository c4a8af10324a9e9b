//! Bounded concurrent dispatch with full-barrier join.
//!
//! The orchestrators fan one unit of work out per listed resource. The pool
//! caps how many units run at once and only returns once every unit has
//! finished, so the caller can sequence snapshot creation and retention
//! sweeps without overlap.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Runs `task` over every item with at most `concurrency` units in flight.
///
/// Completion order follows unit completion, not submission. The returned
/// vector always contains one outcome per successfully joined unit; an empty
/// input returns immediately. A `concurrency` of zero is treated as one.
pub async fn run_all<T, R, F, Fut>(concurrency: usize, items: Vec<T>, task: F) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut units = JoinSet::new();
    for item in items {
        let permits = Arc::clone(&semaphore);
        let unit = task(item);
        units.spawn(async move {
            // The semaphore is never closed, so acquisition only fails if the
            // pool itself is torn down mid-run.
            let _permit = permits.acquire_owned().await.ok();
            unit.await
        });
    }

    let mut outcomes = Vec::with_capacity(units.len());
    while let Some(joined) = units.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => tracing::error!(error = %err, "fan-out unit aborted before completion"),
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn empty_input_returns_immediately() {
        let outcomes: Vec<u32> = run_all(4, Vec::new(), |item: u32| async move { item }).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn all_units_complete_before_return() {
        let completed = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..25).collect();

        let outcomes = run_all(4, items, {
            let completed = Arc::clone(&completed);
            move |item| {
                let completed = Arc::clone(&completed);
                async move {
                    sleep(Duration::from_millis(1)).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    item
                }
            }
        })
        .await;

        assert_eq!(outcomes.len(), 25);
        assert_eq!(completed.load(Ordering::SeqCst), 25);
    }

    #[tokio::test]
    async fn in_flight_units_never_exceed_the_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let high_water = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..20).collect();

        run_all(3, items, {
            let in_flight = Arc::clone(&in_flight);
            let high_water = Arc::clone(&high_water);
            move |_item| {
                let in_flight = Arc::clone(&in_flight);
                let high_water = Arc::clone(&high_water);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    high_water.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            }
        })
        .await;

        assert!(
            high_water.load(Ordering::SeqCst) <= 3,
            "observed {} concurrent units",
            high_water.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn zero_concurrency_still_makes_progress() {
        let outcomes = run_all(0, vec![1_u32, 2, 3], |item| async move { item * 2 }).await;

        let mut doubled = outcomes;
        doubled.sort_unstable();
        assert_eq!(doubled, vec![2, 4, 6]);
    }
}
