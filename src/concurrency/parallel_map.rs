use futures::stream::{FuturesUnordered, StreamExt as _};
use futures::Future;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum ParallelMapError<E> {
    /// One or more tasks failed; errors are in task start order.
    Failed(Vec<E>),
    /// The token was canceled before all tasks could be started.
    Canceled,
}

impl<E: std::fmt::Display> std::fmt::Display for ParallelMapError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(errors) => {
                write!(f, "{} task(s) failed", errors.len())?;
                for error in errors {
                    write!(f, "; {error}")?;
                }
                Ok(())
            }
            Self::Canceled => f.write_str("canceled"),
        }
    }
}

/// Runs the tasks produced by `factories` with at most
/// `degree_of_parallelism` in flight, returning results in input order.
///
/// Once the token is canceled or a task has failed, no further task is
/// started, but every running task is awaited. Failures win over
/// cancellation: if any task failed, the aggregated failures are returned
/// even when the token was canceled as well.
pub async fn parallel_map<I, F, Fut, T, E>(
    factories: I,
    degree_of_parallelism: usize,
    cancel: &CancellationToken,
) -> Result<Vec<T>, ParallelMapError<E>>
where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    assert!(degree_of_parallelism >= 1);

    let mut factories = factories.into_iter().peekable();
    let mut in_flight = FuturesUnordered::new();
    let mut results: Vec<Option<T>> = Vec::new();
    let mut failures: Vec<(usize, E)> = Vec::new();
    let mut canceled = false;

    loop {
        while in_flight.len() < degree_of_parallelism && failures.is_empty() {
            if cancel.is_cancelled() {
                canceled = factories.peek().is_some();
                break;
            }
            let Some(factory) = factories.next() else {
                break;
            };
            let index = results.len();
            results.push(None);
            in_flight.push(async move { (index, factory().await) });
        }

        match in_flight.next().await {
            Some((index, Ok(value))) => results[index] = Some(value),
            Some((index, Err(error))) => failures.push((index, error)),
            None => break,
        }
    }

    if !failures.is_empty() {
        failures.sort_by_key(|&(index, _)| index);
        return Err(ParallelMapError::Failed(
            failures.into_iter().map(|(_, error)| error).collect(),
        ));
    }
    if canceled || (cancel.is_cancelled() && factories.peek().is_some()) {
        return Err(ParallelMapError::Canceled);
    }

    // every started task completed successfully
    Ok(results.into_iter().map(|slot| slot.unwrap()).collect())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::{parallel_map, ParallelMapError};

    #[tokio::test]
    async fn preserves_input_order() {
        let cancel = CancellationToken::new();
        let factories = (0..20u64).map(|i| {
            move || async move {
                // later tasks finish earlier
                tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(i * 2)))
                    .await;
                Ok::<_, String>(i * 10)
            }
        });

        let results = parallel_map(factories, 4, &cancel).await.unwrap();
        assert_eq!(results, (0..20u64).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn aggregates_failures() {
        let cancel = CancellationToken::new();
        let factories = (0..10u32).map(|i| {
            move || async move {
                if i % 3 == 0 {
                    Err(format!("task {i}"))
                } else {
                    Ok(i)
                }
            }
        });

        match parallel_map(factories, 2, &cancel).await {
            Err(ParallelMapError::Failed(errors)) => {
                assert_eq!(errors[0], "task 0");
                assert!(!errors.is_empty());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_stops_scheduling() {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let factories = (0..100u32).map(move |i| {
            let cancel = cancel_clone.clone();
            move || async move {
                if i == 0 {
                    cancel.cancel();
                }
                Ok::<_, String>(i)
            }
        });

        match parallel_map(factories, 1, &cancel).await {
            Err(ParallelMapError::Canceled) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_wins_over_cancellation() {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let factories = (0..10u32).map(move |i| {
            let cancel = cancel_clone.clone();
            move || async move {
                if i == 0 {
                    cancel.cancel();
                    Err("boom".to_owned())
                } else {
                    Ok(i)
                }
            }
        });

        match parallel_map(factories, 2, &cancel).await {
            Err(ParallelMapError::Failed(errors)) => assert_eq!(errors, ["boom"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let cancel = CancellationToken::new();
        let factories = std::iter::empty::<fn() -> std::future::Ready<Result<u32, String>>>();
        let results = parallel_map(factories, 3, &cancel).await.unwrap();
        assert!(results.is_empty());
    }
}
