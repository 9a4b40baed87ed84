// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wait for a condition that background work makes true eventually

use std::future::Future;
use std::time::Duration;
use std::time::Instant;
use thiserror::Error;

/// Result of one evaluation of the condition
#[derive(Debug, Error)]
pub enum CondCheckError<E> {
    /// The condition is not yet true; poll again.
    #[error("poll condition not yet ready")]
    NotYet,
    /// The condition can never become true.
    #[error("non-retryable error while polling on condition")]
    Failed(#[from] E),
}

#[derive(Debug, Error)]
pub enum Error<E> {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("non-retryable error while polling on condition")]
    PermanentError(#[source] E),
}

/// Evaluate `cond` every `poll_interval` until it returns `Ok`, fails
/// permanently, or `poll_max` has elapsed.
pub async fn wait_for_condition<O, E, Func, Fut>(
    mut cond: Func,
    poll_interval: &Duration,
    poll_max: &Duration,
) -> Result<O, Error<E>>
where
    Func: FnMut() -> Fut,
    Fut: Future<Output = Result<O, CondCheckError<E>>>,
{
    let poll_start = Instant::now();
    loop {
        let duration = Instant::now().duration_since(poll_start);
        if duration > *poll_max {
            return Err(Error::TimedOut(duration));
        }

        match cond().await {
            Ok(output) => return Ok(output),
            Err(CondCheckError::Failed(e)) => {
                return Err(Error::PermanentError(e))
            }
            Err(CondCheckError::NotYet) => {}
        }

        tokio::time::sleep(*poll_interval).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_condition_eventually_true() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let result = wait_for_condition::<_, (), _, _>(
            move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CondCheckError::NotYet)
                } else {
                    Ok("ready")
                }
            },
            &Duration::from_millis(1),
            &Duration::from_secs(10),
        )
        .await;
        assert_matches!(result, Ok("ready"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_condition_times_out() {
        let result = wait_for_condition::<(), (), _, _>(
            || async { Err(CondCheckError::NotYet) },
            &Duration::from_millis(1),
            &Duration::from_millis(20),
        )
        .await;
        assert_matches!(result, Err(Error::TimedOut(_)));
    }

    #[tokio::test]
    async fn test_condition_fails() {
        let result = wait_for_condition::<(), &str, _, _>(
            || async { Err(CondCheckError::Failed("broken")) },
            &Duration::from_millis(1),
            &Duration::from_secs(10),
        )
        .await;
        assert_matches!(result, Err(Error::PermanentError("broken")));
    }
}
