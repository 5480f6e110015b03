//! Generic worker poll loop.
//!
//! Non-daemon workers drain the backlog and exit after two consecutive
//! empty polls; daemons keep polling until killed. A batch error is logged
//! and the loop continues, so a poisoned batch cannot take the worker down.

use std::future::Future;
use std::time::Duration;

use tracing::{error, info};

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub poll_interval: Duration,
    /// Run a single batch and exit.
    pub once: bool,
    /// Keep running even when no work is left.
    pub daemon: bool,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            once: false,
            daemon: false,
        }
    }
}

/// Drive `batch` until the work runs out (or forever in daemon mode).
/// `batch` returns how many items it processed.
pub async fn run_poll_loop<F, Fut>(
    name: &str,
    options: PollOptions,
    mut batch: F,
) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<usize>>,
{
    info!(worker = name, "starting worker loop");
    let mut consecutive_empty = 0u32;

    loop {
        match batch().await {
            Ok(processed) if processed > 0 => {
                info!(worker = name, processed, "batch complete");
                consecutive_empty = 0;
            }
            Ok(_) => consecutive_empty += 1,
            Err(e) => error!(worker = name, error = %e, "worker batch error"),
        }

        if options.once {
            break;
        }
        if !options.daemon && consecutive_empty >= 2 {
            info!(worker = name, "no more work, exiting");
            break;
        }

        tokio::time::sleep(options.poll_interval).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn once_runs_a_single_batch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        run_poll_loop(
            "test",
            PollOptions {
                once: true,
                ..Default::default()
            },
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(5)
                }
            },
        )
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exits_after_two_consecutive_empty_polls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        run_poll_loop(
            "test",
            PollOptions {
                poll_interval: Duration::from_millis(1),
                ..Default::default()
            },
            move || {
                let counter = counter.clone();
                async move {
                    // One productive batch, then nothing.
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Ok(if n == 0 { 3 } else { 0 })
                }
            },
        )
        .await
        .unwrap();
        // 1 productive + 2 empty.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn batch_errors_do_not_kill_the_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        run_poll_loop(
            "test",
            PollOptions {
                poll_interval: Duration::from_millis(1),
                ..Default::default()
            },
            move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        anyhow::bail!("transient store hiccup")
                    }
                    Ok(0)
                }
            },
        )
        .await
        .unwrap();
        // 1 error + 2 empty polls.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
