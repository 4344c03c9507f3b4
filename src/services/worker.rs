//! Periodic worker supervision.
//!
//! Each driver runs in its own loop with an internal tick, so a driver
//! never overlaps itself. The supervisor isolates failures: a panicked
//! worker is restarted after a cooldown without touching its peers; a
//! worker that hits an invariant violation stops and stays stopped.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::DriverError;

pub fn spawn_supervised<F, Fut>(
    name: &'static str,
    period: Duration,
    cooldown: Duration,
    run_once: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), DriverError>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let pass = run_once.clone();
            let worker = tokio::spawn(async move {
                let mut tick = tokio::time::interval(period);
                tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tick.tick().await;
                    match pass().await {
                        Ok(()) => {}
                        Err(e) if e.is_fatal() => {
                            tracing::error!(worker = name, error = %e, "worker stopping");
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(worker = name, error = %e, "worker pass failed");
                        }
                    }
                }
            });

            match worker.await {
                // Deliberate stop after a fatal error.
                Ok(()) => break,
                Err(e) if e.is_panic() => {
                    tracing::error!(worker = name, "worker panicked, restarting after cooldown");
                    tokio::time::sleep(cooldown).await;
                }
                Err(_) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn panicked_worker_restarts_after_cooldown() {
        let passes = Arc::new(AtomicU32::new(0));
        let counter = passes.clone();

        let handle = spawn_supervised(
            "test",
            Duration::from_millis(5),
            Duration::from_millis(5),
            move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        panic!("first pass blows up");
                    }
                    Ok(())
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        // The panic on pass 0 did not stop the worker for good.
        assert!(passes.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn fatal_error_stops_the_worker() {
        use crate::store::StoreError;

        let passes = Arc::new(AtomicU32::new(0));
        let counter = passes.clone();

        let handle = spawn_supervised(
            "test-fatal",
            Duration::from_millis(5),
            Duration::from_millis(5),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(DriverError::Store(StoreError::Invariant(
                        "negative residual".to_string(),
                    )))
                }
            },
        );

        handle.await.unwrap();
        assert_eq!(passes.load(Ordering::SeqCst), 1);
    }
}
